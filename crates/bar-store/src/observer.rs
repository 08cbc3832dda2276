//! 저장소 관측 지점과 메트릭.
//!
//! 카운터는 저장소 인스턴스가 소유합니다. `StoreObserver`는 생성 시
//! 주입되며 기본값은 아무것도 하지 않는 `NoopObserver`입니다.

use crate::flush::Backpressure;
use crate::storage::Eviction;
use bar_core::{Timeframe, Violation};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// 조회 레이어.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Ram,
    Redis,
    Disk,
}

/// 저장소 이벤트 훅. 모든 메서드는 기본 no-op입니다.
pub trait StoreObserver: Send + Sync {
    fn on_lookup(&self, _layer: Layer, _symbol: &str, _timeframe: Timeframe, _hit: bool) {}

    fn on_validation_failure(&self, _symbol: &str, _timeframe: Timeframe, _violations: &[Violation]) {}

    fn on_flush(&self, _symbol: &str, _timeframe: Timeframe, _ok: bool) {}

    fn on_eviction(&self, _eviction: &Eviction) {}

    fn on_backpressure(&self, _backlog: usize, _level: Backpressure) {}
}

/// 아무것도 하지 않는 관측자.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StoreObserver for NoopObserver {}

/// tracing 이벤트로 내보내는 관측자.
///
/// 경고성 이벤트는 저장소가 이미 warn/error로 남기므로 여기서는 debug로만 내보냅니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl StoreObserver for TracingObserver {
    fn on_lookup(&self, layer: Layer, symbol: &str, timeframe: Timeframe, hit: bool) {
        debug!(?layer, symbol, tf = %timeframe, hit, "레이어 조회");
    }

    fn on_validation_failure(&self, symbol: &str, timeframe: Timeframe, violations: &[Violation]) {
        let first = violations.first().map(|v| v.to_string()).unwrap_or_default();
        debug!(symbol, tf = %timeframe, count = violations.len(), first = %first, "프레임 검증 실패");
    }

    fn on_flush(&self, symbol: &str, timeframe: Timeframe, ok: bool) {
        debug!(symbol, tf = %timeframe, ok, "flush 결과");
    }

    fn on_eviction(&self, eviction: &Eviction) {
        debug!(
            symbol = %eviction.symbol,
            tf = %eviction.timeframe,
            reason = ?eviction.reason,
            "RAM 항목 축출"
        );
    }

    fn on_backpressure(&self, backlog: usize, level: Backpressure) {
        debug!(backlog, ?level, "flush 백로그 압력");
    }
}

/// 저장소 카운터.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    ram_hits: AtomicU64,
    ram_misses: AtomicU64,
    redis_hits: AtomicU64,
    redis_misses: AtomicU64,
    disk_hits: AtomicU64,
    disk_misses: AtomicU64,
    validation_errors: AtomicU64,
    flush_ok: AtomicU64,
    flush_failed: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    materialized: AtomicU64,
}

impl StoreMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lookup(&self, layer: Layer, hit: bool) {
        let counter = match (layer, hit) {
            (Layer::Ram, true) => &self.ram_hits,
            (Layer::Ram, false) => &self.ram_misses,
            (Layer::Redis, true) => &self.redis_hits,
            (Layer::Redis, false) => &self.redis_misses,
            (Layer::Disk, true) => &self.disk_hits,
            (Layer::Disk, false) => &self.disk_misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_errors(&self, count: usize) {
        self.validation_errors
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_flush(&self, ok: bool) {
        if ok {
            self.flush_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.flush_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_materialized(&self) {
        self.materialized.fetch_add(1, Ordering::Relaxed);
    }

    /// 현재 카운터와 게이지 값으로 스냅샷을 만듭니다.
    pub fn snapshot(&self, backlog: usize, ram_bytes: usize, ram_entries: usize) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ram: LayerStats::new(load(&self.ram_hits), load(&self.ram_misses)),
            redis: LayerStats::new(load(&self.redis_hits), load(&self.redis_misses)),
            disk: LayerStats::new(load(&self.disk_hits), load(&self.disk_misses)),
            validation_errors: load(&self.validation_errors),
            flush_ok: load(&self.flush_ok),
            flush_failed: load(&self.flush_failed),
            coalesced: load(&self.coalesced),
            evictions: load(&self.evictions),
            materialized: load(&self.materialized),
            backlog,
            ram_bytes,
            ram_entries,
        }
    }
}

/// 레이어별 조회 통계.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LayerStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl LayerStats {
    fn new(hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };
        Self {
            hits,
            misses,
            hit_rate,
        }
    }
}

/// 메트릭 스냅샷.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub ram: LayerStats,
    pub redis: LayerStats,
    pub disk: LayerStats,
    pub validation_errors: u64,
    pub flush_ok: u64,
    pub flush_failed: u64,
    /// 기존 flush 작업에 합쳐진 put 수
    pub coalesced: u64,
    pub evictions: u64,
    /// 하위 타임프레임에서 파생된 프레임 수
    pub materialized: u64,
    pub backlog: usize,
    pub ram_bytes: usize,
    pub ram_entries: usize,
}

impl MetricsSnapshot {
    /// 요약 로그 출력.
    pub fn log_summary(&self) {
        tracing::info!(
            ram_hit_rate = format!("{:.1}%", self.ram.hit_rate * 100.0),
            redis_hit_rate = format!("{:.1}%", self.redis.hit_rate * 100.0),
            disk_hit_rate = format!("{:.1}%", self.disk.hit_rate * 100.0),
            validation_errors = self.validation_errors,
            flush_ok = self.flush_ok,
            flush_failed = self.flush_failed,
            backlog = self.backlog,
            ram_mb = format!("{:.2}", self.ram_bytes as f64 / (1024.0 * 1024.0)),
            ram_entries = self.ram_entries,
            "저장소 메트릭"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = StoreMetrics::new();
        metrics.record_lookup(Layer::Ram, true);
        metrics.record_lookup(Layer::Ram, true);
        metrics.record_lookup(Layer::Ram, true);
        metrics.record_lookup(Layer::Ram, false);
        metrics.record_lookup(Layer::Disk, false);

        let snapshot = metrics.snapshot(2, 1024, 3);
        assert_eq!(snapshot.ram.hits, 3);
        assert!((snapshot.ram.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(snapshot.disk.hit_rate, 0.0);
        assert_eq!(snapshot.redis, LayerStats::default());
        assert_eq!(snapshot.backlog, 2);
    }

    #[test]
    fn test_flush_and_validation_counters() {
        let metrics = StoreMetrics::new();
        metrics.record_flush(true);
        metrics.record_flush(false);
        metrics.record_validation_errors(3);
        metrics.record_coalesced();

        let snapshot = metrics.snapshot(0, 0, 0);
        assert_eq!(snapshot.flush_ok, 1);
        assert_eq!(snapshot.flush_failed, 1);
        assert_eq!(snapshot.validation_errors, 3);
        assert_eq!(snapshot.coalesced, 1);
    }
}
