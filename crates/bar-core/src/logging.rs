//! tracing을 사용한 로깅 인프라.
//!
//! 저장소를 내장하는 프로세스가 한 번 호출해 구독자를 설치합니다:
//! - **pretty**: 개발용 사람이 읽기 쉬운 형식
//! - **json**: 운영환경/로그 집계용 JSON 형식
//! - **compact**: 한 줄 형식

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log format: {}", s)),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 로그 레벨 필터 (예: "info", "bar_store=debug")
    pub level: String,
    pub format: LogFormat,
    /// 파일명과 줄 번호 포함 여부
    pub with_file: bool,
    /// 대상(모듈 경로) 포함 여부
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_file: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// `RUST_LOG`, `LOG_FORMAT` 환경 변수에서 설정을 생성합니다.
    pub fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            level,
            format,
            ..Default::default()
        }
    }
}

/// 주어진 설정으로 전역 구독자를 설치합니다.
///
/// 이미 설치되어 있으면 에러를 반환합니다.
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format {
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .pretty()
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_target(config.with_target);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_target(config.with_target);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_file(config.with_file)
                .with_line_number(config.with_file)
                .with_target(config.with_target);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()?;
        }
    }

    tracing::info!(format = ?config.format, level = %config.level, "Logging initialized");
    Ok(())
}

/// (심볼, 타임프레임) 컨텍스트 필드가 포함된 span을 생성하는 매크로.
#[macro_export]
macro_rules! series_span {
    ($name:expr, $symbol:expr, $timeframe:expr) => {
        tracing::info_span!($name, symbol = %$symbol, tf = %$timeframe)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("COMPACT".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("bar_store=debug").with_format(LogFormat::Json);
        assert_eq!(config.level, "bar_store=debug");
        assert_eq!(config.format, LogFormat::Json);
    }
}
