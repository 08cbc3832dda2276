//! 저장 계층.
//!
//! - `ram`: 프로세스 내 TTL/LRU/우선순위 캐시
//! - `redis`: 프로세스 간 last-bar 미러
//! - `disk`: 원자적 JSONL 스냅샷

pub mod disk;
pub mod ram;
pub mod redis;

pub use disk::{DiskAdapter, EpochUnit, Snapshot};
pub use ram::{Eviction, EvictionReason, Priority, RamLayer, SeriesKey};
pub use self::redis::{KeyValueBackend, MemoryBackend, RedisAdapter, RedisBackend, RedisConfig};
