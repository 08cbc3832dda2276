//! # Bar Core
//!
//! 바 저장소 전반에서 사용되는 핵심 도메인 타입을 제공합니다:
//! - OHLCV 바(`Bar`)와 정렬/중복 제거된 시계열(`Frame`)
//! - 타임프레임 정의 및 상위 타임프레임 파생 체인
//! - 수집 경계에서 사용하는 태그된 메시지 타입
//! - 로깅 인프라

pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
