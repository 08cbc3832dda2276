//! 상위 타임프레임 파생.
//!
//! `1m → 5m → 1h → 4h` 체인에서 하위 프레임을 상위 버킷으로 집계합니다.
//! 버킷은 epoch 기준 배수에 정렬되며, 모든 하위 슬롯이 채워진 버킷만
//! 결과에 포함됩니다.

use bar_core::{Bar, Frame, Timeframe};

/// `source`(타임프레임 `source_tf`)를 `target_tf`로 집계합니다.
///
/// `target_tf`가 `source_tf`의 정수배가 아니면 빈 프레임을 반환합니다.
/// 마지막 하위 바가 명시적으로 미확정(`is_closed == Some(false)`)인 버킷도
/// 제외합니다.
pub fn aggregate(source: &Frame, source_tf: Timeframe, target_tf: Timeframe) -> Frame {
    let source_ms = source_tf.as_millis();
    let target_ms = target_tf.as_millis();
    if target_ms <= source_ms || target_ms % source_ms != 0 {
        return Frame::new();
    }
    let slots = (target_ms / source_ms) as usize;

    let mut out = Vec::with_capacity(source.len() / slots + 1);
    let bars = source.bars();
    let mut start = 0;
    while start < bars.len() {
        let bucket = target_tf.bucket_start(bars[start].open_time);
        let mut end = start;
        while end < bars.len() && target_tf.bucket_start(bars[end].open_time) == bucket {
            end += 1;
        }

        if let Some(bar) = fold_bucket(&bars[start..end], bucket, slots, source_tf, target_ms) {
            out.push(bar);
        }
        start = end;
    }

    Frame::from_bars(out)
}

fn fold_bucket(
    group: &[Bar],
    bucket: i64,
    slots: usize,
    source_tf: Timeframe,
    target_ms: i64,
) -> Option<Bar> {
    if group.len() != slots {
        return None;
    }
    // 하위 바가 자기 슬롯에 정렬돼 있지 않으면 집계하지 않는다
    if group
        .iter()
        .any(|b| source_tf.bucket_start(b.open_time) != b.open_time)
    {
        return None;
    }
    let (first, last) = (group.first()?, group.last()?);
    if last.is_closed == Some(false) {
        return None;
    }

    let high = group.iter().map(|b| b.high).max()?;
    let low = group.iter().map(|b| b.low).min()?;
    let volume = group.iter().map(|b| b.volume).sum();

    Some(
        Bar::new(
            bucket,
            first.open,
            high,
            low,
            last.close,
            volume,
            bucket + target_ms - 1,
        )
        .with_closed(true),
    )
}

/// `target`까지 거쳐야 할 하위 타임프레임 목록 (가까운 순).
pub fn source_chain(target: Timeframe) -> Vec<Timeframe> {
    let mut chain = Vec::new();
    let mut current = target;
    while let Some(source) = current.materialization_source() {
        chain.push(source);
        current = source;
    }
    chain
}
