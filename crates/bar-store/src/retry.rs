//! 지수 백오프 재시도.
//!
//! Redis/디스크 I/O의 유일한 스로틀링 수단입니다. 작업 단위 타임아웃은
//! 두지 않습니다.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// 재시도 정책.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 총 시도 횟수 (최소 1)
    pub max_attempts: u32,
    /// 첫 재시도 전 대기. 이후 시도마다 2배
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// `attempt`번째(0부터) 실패 후 대기 시간: `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

/// 비동기 작업을 정책에 따라 재시도합니다.
///
/// 마지막 시도의 에러를 그대로 반환합니다.
pub async fn with_retry<T, E, F, Fut>(config: RetryConfig, op: &str, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < attempts => {
                let delay = config.delay_for(attempt);
                debug!(op, attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "재시도 대기");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles() {
        let config = RetryConfig::new(4, Duration::from_millis(10));
        assert_eq!(config.delay_for(0), Duration::from_millis(10));
        assert_eq!(config.delay_for(1), Duration::from_millis(20));
        assert_eq!(config.delay_for(3), Duration::from_millis(80));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryConfig::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_with_retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(3, Duration::from_millis(1));
        let result: Result<u32, String> = with_retry(config, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(format!("fail {}", n))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_returns_last_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::new(2, Duration::from_millis(1));
        let result: Result<(), String> = with_retry(config, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("down".to_string())
        })
        .await;
        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
