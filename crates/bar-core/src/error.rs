//! 도메인 에러 타입.

use thiserror::Error;

/// 바 도메인 에러.
#[derive(Debug, Error)]
pub enum CoreError {
    /// 잘못된 입력 (빈 심볼, 빈 배치 등)
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 알 수 없는 타임프레임
    #[error("알 수 없는 타임프레임: {0}")]
    UnknownTimeframe(String),

    /// 바 데이터 검증 실패
    #[error("바 검증 실패: {0}")]
    Validation(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),
}

/// 도메인 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownTimeframe("7m".to_string());
        assert_eq!(err.to_string(), "알 수 없는 타임프레임: 7m");
    }

    #[test]
    fn test_from_serde_error() {
        let err: CoreError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
    }
}
