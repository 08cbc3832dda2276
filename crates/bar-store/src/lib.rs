//! # Bar Store
//!
//! 스트리밍 OHLCV 데이터를 위한 계층형 저장소입니다.
//!
//! ## 레이어
//! - **RAM**: TTL + LRU + 우선순위 캐시 (`storage::ram`)
//! - **Redis**: 프로세스 간 last-bar 미러 (`storage::redis`)
//! - **디스크**: 원자적 JSONL 스냅샷 (`storage::disk`)
//!
//! `UnifiedStore`가 세 레이어를 묶어 read-through, write-behind, 타임프레임
//! 파생, 콜드 스타트 보고를 제공하고, `MaintenanceSupervisor`가 백그라운드
//! 정리와 flush를 담당합니다.
//!
//! ```ignore
//! bar_core::init_logging(LogConfig::from_env())?;
//!
//! let config = StoreConfig::from_env()?;
//! let store = Arc::new(UnifiedStore::connect(config, &RedisConfig::default()).await?);
//!
//! let cancel = CancellationToken::new();
//! let (supervisor, events) = MaintenanceSupervisor::new(store.clone(), cancel.clone());
//! supervisor.spawn();
//!
//! store.put_bars("btcusdt", Timeframe::M1, bars).await;
//! let frame = store.get_df("btcusdt", Timeframe::M5, Some(100)).await;
//! ```

pub mod cold_start;
pub mod config;
pub mod error;
pub mod flush;
pub mod maintenance;
pub mod materialize;
pub mod observer;
pub mod retry;
pub mod storage;
pub mod store;

pub use cold_start::{ColdStartEntry, ColdStartSummary};
pub use config::{StoreConfig, StoreProfile};
pub use error::{Result, StoreError};
pub use flush::{Backpressure, FlushPolicy, FlushQueue};
pub use maintenance::{run_maintenance, MaintenanceEvent, MaintenanceSupervisor};
pub use observer::{Layer, MetricsSnapshot, NoopObserver, StoreObserver, TracingObserver};
pub use retry::{with_retry, RetryConfig};
pub use storage::{
    DiskAdapter, KeyValueBackend, MemoryBackend, Priority, RamLayer, RedisAdapter, RedisBackend,
    RedisConfig,
};
pub use store::UnifiedStore;
