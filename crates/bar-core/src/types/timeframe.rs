//! 바 시계열의 타임프레임 정의.
//!
//! 문자열 표현(`"1m"`, `"4h"` 등)은 디스크 파일명, Redis 키, 설정 맵의
//! 키로 그대로 사용됩니다.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 바 타임프레임.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// 1분봉
    #[serde(rename = "1m")]
    M1,
    /// 3분봉
    #[serde(rename = "3m")]
    M3,
    /// 5분봉
    #[serde(rename = "5m")]
    M5,
    /// 15분봉
    #[serde(rename = "15m")]
    M15,
    /// 30분봉
    #[serde(rename = "30m")]
    M30,
    /// 1시간봉
    #[serde(rename = "1h")]
    H1,
    /// 2시간봉
    #[serde(rename = "2h")]
    H2,
    /// 4시간봉
    #[serde(rename = "4h")]
    H4,
    /// 12시간봉
    #[serde(rename = "12h")]
    H12,
    /// 일봉
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// 지원하는 모든 타임프레임.
    pub const ALL: [Timeframe; 10] = [
        Timeframe::M1,
        Timeframe::M3,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::M30,
        Timeframe::H1,
        Timeframe::H2,
        Timeframe::H4,
        Timeframe::H12,
        Timeframe::D1,
    ];

    /// 이 타임프레임의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.as_secs())
    }

    /// 초 단위 길이.
    pub fn as_secs(&self) -> u64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M3 => 3 * 60,
            Timeframe::M5 => 5 * 60,
            Timeframe::M15 => 15 * 60,
            Timeframe::M30 => 30 * 60,
            Timeframe::H1 => 60 * 60,
            Timeframe::H2 => 2 * 60 * 60,
            Timeframe::H4 => 4 * 60 * 60,
            Timeframe::H12 => 12 * 60 * 60,
            Timeframe::D1 => 24 * 60 * 60,
        }
    }

    /// 밀리초 단위 길이 (epoch ms 산술용).
    pub fn as_millis(&self) -> i64 {
        self.as_secs() as i64 * 1000
    }

    /// 문자열 표현.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }

    /// 갱신이 잦은 타임프레임인지 여부 (RAM hot TTL 적용 대상).
    pub fn is_fast(&self) -> bool {
        matches!(self, Timeframe::M1 | Timeframe::M5)
    }

    /// 이 타임프레임을 파생할 때 사용하는 바로 아래 단계.
    ///
    /// 파생 체인은 `1m → 5m → 1h → 4h` 입니다. 체인에 없는 타임프레임은
    /// `None`을 반환합니다.
    pub fn materialization_source(&self) -> Option<Timeframe> {
        match self {
            Timeframe::M5 => Some(Timeframe::M1),
            Timeframe::H1 => Some(Timeframe::M5),
            Timeframe::H4 => Some(Timeframe::H1),
            _ => None,
        }
    }

    /// 주어진 epoch ms가 속한 버킷의 시작 시각.
    pub fn bucket_start(&self, ts_ms: i64) -> i64 {
        ts_ms - ts_ms.rem_euclid(self.as_millis())
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| CoreError::UnknownTimeframe(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_duration() {
        assert_eq!(Timeframe::M1.as_secs(), 60);
        assert_eq!(Timeframe::H4.as_millis(), 14_400_000);
        assert_eq!(Timeframe::D1.duration(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_timeframe_parse_roundtrip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("7m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_materialization_chain() {
        assert_eq!(Timeframe::H4.materialization_source(), Some(Timeframe::H1));
        assert_eq!(Timeframe::H1.materialization_source(), Some(Timeframe::M5));
        assert_eq!(Timeframe::M5.materialization_source(), Some(Timeframe::M1));
        assert_eq!(Timeframe::M1.materialization_source(), None);
        assert_eq!(Timeframe::M15.materialization_source(), None);
    }

    #[test]
    fn test_bucket_start() {
        let five = Timeframe::M5;
        assert_eq!(five.bucket_start(0), 0);
        assert_eq!(five.bucket_start(299_999), 0);
        assert_eq!(five.bucket_start(300_000), 300_000);
    }

    #[test]
    fn test_serde_uses_interval_string() {
        let json = serde_json::to_string(&Timeframe::H1).unwrap();
        assert_eq!(json, "\"1h\"");
        let tf: Timeframe = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(tf, Timeframe::H4);
    }
}
