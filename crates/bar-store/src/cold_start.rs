//! 콜드 스타트 인벤토리 보고.

use bar_core::Timeframe;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// 심볼 하나의 레이어별 보유 현황.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColdStartEntry {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub rows_in_ram: usize,
    pub rows_on_disk: usize,
    /// Redis last-bar 키의 남은 TTL (초). 키가 없거나 Redis 장애면 `None`
    pub redis_ttl_secs: Option<i64>,
    pub last_ts_ram: Option<i64>,
    pub last_ts_disk: Option<i64>,
    pub last_ts_redis: Option<i64>,
    /// 가장 최근 바 이후 경과 시간 (초)
    pub age_secs: Option<i64>,
    pub disk_mtime: Option<DateTime<Utc>>,
}

impl ColdStartEntry {
    /// 세 레이어 중 가장 최근 open_time.
    pub fn latest_ts(&self) -> Option<i64> {
        [self.last_ts_ram, self.last_ts_disk, self.last_ts_redis]
            .into_iter()
            .flatten()
            .max()
    }

    /// 어느 레이어에도 데이터가 없는지 여부.
    pub fn is_missing(&self) -> bool {
        self.rows_in_ram == 0 && self.rows_on_disk == 0 && self.last_ts_redis.is_none()
    }

    /// `now_ms` 기준으로 `age_secs`를 채웁니다.
    pub(crate) fn with_age(mut self, now_ms: i64) -> Self {
        self.age_secs = self.latest_ts().map(|ts| (now_ms - ts) / 1_000);
        self
    }
}

/// 보고서 요약.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColdStartSummary {
    /// 최근 바가 `max_age_secs`보다 오래된 심볼
    pub stale: Vec<String>,
    /// 디스크 행 수가 `min_rows`보다 적은 심볼
    pub insufficient: Vec<String>,
    /// 모든 레이어에 데이터가 없는 심볼
    pub missing: Vec<String>,
}

impl ColdStartSummary {
    pub fn from_entries(entries: &[ColdStartEntry], max_age_secs: i64, min_rows: usize) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            if entry.is_missing() {
                summary.missing.push(entry.symbol.clone());
                continue;
            }
            if entry.age_secs.is_some_and(|age| age > max_age_secs) {
                summary.stale.push(entry.symbol.clone());
            }
            if entry.rows_on_disk < min_rows {
                summary.insufficient.push(entry.symbol.clone());
            }
        }
        summary
    }

    /// 모든 심볼이 준비되었는지 여부.
    pub fn is_ready(&self) -> bool {
        self.stale.is_empty() && self.insufficient.is_empty() && self.missing.is_empty()
    }
}
