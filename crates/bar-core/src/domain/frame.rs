//! 정렬·중복 제거된 바 시계열.
//!
//! `Frame`은 항상 `open_time` 오름차순이며 `open_time`당 정확히 하나의 바만
//! 가집니다. 같은 `open_time`이 겹치면 확정(`is_closed = true`) 바가 미확정
//! 바를 이기고, 그 외에는 나중에 들어온 바가 이깁니다.

use crate::domain::bar::Bar;
use std::fmt;

/// 한 (심볼, 타임프레임)의 바 시계열.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    bars: Vec<Bar>,
}

impl Frame {
    /// 빈 프레임을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 임의 순서의 바 목록으로 프레임을 생성합니다 (정렬 + 중복 제거).
    pub fn from_bars(bars: Vec<Bar>) -> Self {
        Self {
            bars: canonicalize(bars),
        }
    }

    /// 바 슬라이스.
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// 소유한 바 목록을 꺼냅니다.
    pub fn into_bars(self) -> Vec<Bar> {
        self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn last_open_time(&self) -> Option<i64> {
        self.bars.last().map(|b| b.open_time)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Bar> {
        self.bars.iter()
    }

    /// 새 바를 이 프레임에 병합한 결과를 반환합니다.
    ///
    /// 새 바가 모두 현재 마지막 `open_time`보다 크고 자체적으로 오름차순이면
    /// 재정렬 없이 뒤에 붙입니다. 그 외에는 concat → 중복 제거 → 정렬합니다.
    pub fn merge(&self, incoming: &[Bar]) -> Frame {
        if self.is_append_only(incoming) {
            let mut bars = Vec::with_capacity(self.bars.len() + incoming.len());
            bars.extend_from_slice(&self.bars);
            bars.extend_from_slice(incoming);
            return Frame { bars };
        }

        let mut bars = Vec::with_capacity(self.bars.len() + incoming.len());
        bars.extend_from_slice(&self.bars);
        bars.extend_from_slice(incoming);
        Frame::from_bars(bars)
    }

    /// 병합이 단순 추가로 끝나는지 확인합니다.
    pub fn is_append_only(&self, incoming: &[Bar]) -> bool {
        let strictly_ascending = incoming.windows(2).all(|w| w[0].open_time < w[1].open_time);
        let after_tail = match (self.last_open_time(), incoming.first()) {
            (Some(last), Some(first)) => first.open_time > last,
            _ => true,
        };
        strictly_ascending && after_tail
    }

    /// 마지막 `limit`개 바만 남긴 프레임.
    pub fn tail(&self, limit: usize) -> Frame {
        let start = self.bars.len().saturating_sub(limit);
        Frame {
            bars: self.bars[start..].to_vec(),
        }
    }

    /// 대략적인 메모리 사용량 (바이트).
    pub fn estimated_bytes(&self) -> usize {
        std::mem::size_of::<Frame>() + self.bars.capacity() * std::mem::size_of::<Bar>()
    }

    /// 프레임 데이터 품질을 검사하고 위반 목록을 반환합니다.
    pub fn validate(&self) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (idx, bar) in self.bars.iter().enumerate() {
            if !bar.has_valid_envelope() {
                violations.push(Violation::new(bar.open_time, ViolationKind::Envelope));
            }
            if bar.volume.is_sign_negative() {
                violations.push(Violation::new(bar.open_time, ViolationKind::NegativeVolume));
            }
            if bar.close_time < bar.open_time {
                violations.push(Violation::new(bar.open_time, ViolationKind::CloseBeforeOpen));
            }
            if idx > 0 && self.bars[idx - 1].open_time >= bar.open_time {
                violations.push(Violation::new(bar.open_time, ViolationKind::Ordering));
            }
        }

        violations
    }
}

impl From<Vec<Bar>> for Frame {
    fn from(bars: Vec<Bar>) -> Self {
        Frame::from_bars(bars)
    }
}

impl<'a> IntoIterator for &'a Frame {
    type Item = &'a Bar;
    type IntoIter = std::slice::Iter<'a, Bar>;

    fn into_iter(self) -> Self::IntoIter {
        self.bars.iter()
    }
}

/// 검증 위반 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// 고가/저가가 시가·종가를 감싸지 않음
    Envelope,
    /// 음수 거래량
    NegativeVolume,
    /// 종료 시각이 시작 시각보다 앞섬
    CloseBeforeOpen,
    /// 오름차순/유일성 위반
    Ordering,
}

/// 검증 위반 하나.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub open_time: i64,
    pub kind: ViolationKind,
}

impl Violation {
    fn new(open_time: i64, kind: ViolationKind) -> Self {
        Self { open_time, kind }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind, self.open_time)
    }
}

/// 안정 정렬 후 같은 `open_time`을 하나로 접습니다.
fn canonicalize(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.open_time);

    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(prev) if prev.open_time == bar.open_time => {
                if !(prev.is_final() && !bar.is_final()) {
                    *prev = bar;
                }
            }
            _ => out.push(bar),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(open_time: i64, close: Decimal, closed: Option<bool>) -> Bar {
        Bar {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            close_time: open_time + 59_999,
            is_closed: closed,
        }
    }

    #[test]
    fn test_from_bars_sorts_and_dedups() {
        let frame = Frame::from_bars(vec![
            bar(120_000, dec!(3), None),
            bar(0, dec!(1), None),
            bar(60_000, dec!(2), None),
            bar(60_000, dec!(2.5), None),
        ]);
        let times: Vec<i64> = frame.iter().map(|b| b.open_time).collect();
        assert_eq!(times, vec![0, 60_000, 120_000]);
        // 둘 다 미확정이면 나중 값
        assert_eq!(frame.bars()[1].close, dec!(2.5));
    }

    #[test]
    fn test_closed_bar_wins_over_provisional() {
        let existing = Frame::from_bars(vec![bar(0, dec!(10), Some(true))]);
        let merged = existing.merge(&[bar(0, dec!(11), Some(false))]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.bars()[0].close, dec!(10));

        let provisional = Frame::from_bars(vec![bar(0, dec!(10), Some(false))]);
        let merged = provisional.merge(&[bar(0, dec!(12), Some(true))]);
        assert_eq!(merged.bars()[0].close, dec!(12));
        assert!(merged.bars()[0].is_final());
    }

    #[test]
    fn test_merge_fast_path_appends() {
        let frame = Frame::from_bars(vec![bar(0, dec!(1), None)]);
        let incoming = [bar(60_000, dec!(2), None), bar(120_000, dec!(3), None)];
        assert!(frame.is_append_only(&incoming));
        let merged = frame.merge(&incoming);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.last_open_time(), Some(120_000));
    }

    #[test]
    fn test_merge_unsorted_incoming_takes_general_path() {
        let frame = Frame::from_bars(vec![bar(0, dec!(1), None)]);
        let incoming = [bar(120_000, dec!(3), None), bar(60_000, dec!(2), None)];
        assert!(!frame.is_append_only(&incoming));
        let merged = frame.merge(&incoming);
        assert!(merged.validate().is_empty());
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_tail() {
        let frame = Frame::from_bars((0..10).map(|i| bar(i * 60_000, dec!(1), None)).collect());
        let tail = frame.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.first().map(|b| b.open_time), Some(7 * 60_000));
        assert_eq!(frame.tail(100).len(), 10);
    }

    #[test]
    fn test_validate_reports_violations() {
        let mut broken = bar(0, dec!(10), None);
        broken.high = dec!(9);
        broken.volume = dec!(-1);
        let frame = Frame::from_bars(vec![broken]);
        let kinds: Vec<ViolationKind> = frame.validate().iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::Envelope));
        assert!(kinds.contains(&ViolationKind::NegativeVolume));
    }

    proptest! {
        #[test]
        fn prop_merge_is_unique_sorted_and_closed_wins(
            existing in prop::collection::vec((0i64..50, any::<bool>()), 0..40),
            incoming in prop::collection::vec((0i64..50, any::<bool>()), 1..40),
        ) {
            let to_bars = |v: &[(i64, bool)]| -> Vec<Bar> {
                v.iter().map(|(t, c)| bar(t * 60_000, Decimal::from(*t), Some(*c))).collect()
            };
            let base = Frame::from_bars(to_bars(&existing));
            let merged = base.merge(&to_bars(&incoming));

            prop_assert!(merged.bars().windows(2).all(|w| w[0].open_time < w[1].open_time));

            for b in merged.iter() {
                let any_closed = existing.iter().chain(incoming.iter())
                    .any(|(t, c)| t * 60_000 == b.open_time && *c);
                prop_assert_eq!(b.is_final(), any_closed);
            }

            let again = merged.merge(&to_bars(&incoming));
            prop_assert_eq!(again, merged);
        }
    }
}
