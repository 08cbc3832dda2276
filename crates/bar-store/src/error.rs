//! 저장소 모듈 오류 타입.

use thiserror::Error;

/// 저장소 관련 오류.
#[derive(Debug, Error)]
pub enum StoreError {
    /// 파일 I/O 오류
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis 오류
    #[error("Cache error: {0}")]
    Cache(String),

    /// 직렬화/역직렬화 오류
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 잘못된 데이터 형식
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),

    /// blocking 작업 join 실패
    #[error("Task join error: {0}")]
    TaskJoin(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for StoreError {
    fn from(err: config::ConfigError) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::TaskJoin(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let io: StoreError = std::io::Error::new(std::io::ErrorKind::Other, "busy").into();
        assert!(matches!(io, StoreError::Io(_)));

        let json: StoreError = serde_json::from_str::<u32>("x").unwrap_err().into();
        assert!(matches!(json, StoreError::Serialization(_)));
    }
}
