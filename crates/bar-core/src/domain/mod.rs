//! 바 저장소의 도메인 모델.

mod bar;
mod frame;
pub mod ingest;

pub use bar::*;
pub use frame::*;
pub use ingest::{normalize_symbol, BarBatch, IngestMessage};
