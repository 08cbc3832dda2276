//! 저장소 설정.
//!
//! `StoreConfig`는 생성 시 주입되고 이후 저장소가 변경하지 않습니다.
//! 프로필 프리셋, 설정 파일(`config` crate), 환경 변수 세 가지 경로로
//! 만들 수 있습니다.

use crate::error::{Result, StoreError};
use crate::retry::RetryConfig;
use bar_core::Timeframe;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// 실행 환경 프로필.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreProfile {
    #[default]
    Prod,
    Local,
    Test,
}

impl StoreProfile {
    /// Redis 네임스페이스 기본값.
    pub fn namespace(&self) -> &'static str {
        match self {
            StoreProfile::Prod => "prod",
            StoreProfile::Local => "local",
            StoreProfile::Test => "test",
        }
    }
}

impl FromStr for StoreProfile {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Ok(StoreProfile::Prod),
            "local" | "dev" => Ok(StoreProfile::Local),
            "test" => Ok(StoreProfile::Test),
            other => Err(StoreError::Config(format!("알 수 없는 프로필: {}", other))),
        }
    }
}

/// 통합 저장소 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis 키 네임스페이스 (prod/local 환경 격리)
    pub namespace: String,
    /// 디스크 스냅샷 디렉토리
    pub base_dir: PathBuf,
    /// 타임프레임별 Redis last-bar TTL (초)
    pub redis_ttl_secs: HashMap<Timeframe, u64>,
    /// 맵에 없는 타임프레임의 Redis TTL (초)
    pub default_redis_ttl_secs: u64,
    /// RAM 사용량 상한 (MB, 추정치 기준)
    pub ram_limit_mb: f64,
    /// RAM에 유지할 최대 심볼 수
    pub max_symbols_hot: usize,
    /// 1m/5m 프레임의 RAM TTL (초)
    pub hot_ttl_secs: u64,
    /// 그 외 프레임의 RAM TTL (초)
    pub warm_ttl_secs: u64,
    /// write-behind 사용 여부 (false면 put_bars에서 동기 flush)
    pub write_behind: bool,
    /// 백로그가 적을 때 tick당 flush 개수
    pub flush_batch_max: usize,
    /// 백로그 경고 임계치
    pub flush_queue_soft: usize,
    /// 백로그 심각 임계치
    pub flush_queue_hard: usize,
    /// 디스크 로드 시 검증
    pub validate_on_read: bool,
    /// put_bars 시 검증
    pub validate_on_write: bool,
    /// I/O 재시도 횟수
    pub io_retry_attempts: u32,
    /// I/O 재시도 기본 대기 (밀리초, 시도마다 2배)
    pub io_retry_backoff_ms: u64,
}

fn default_redis_ttls() -> HashMap<Timeframe, u64> {
    HashMap::from([
        (Timeframe::M1, 600),
        (Timeframe::M3, 900),
        (Timeframe::M5, 1_800),
        (Timeframe::M15, 3_600),
        (Timeframe::M30, 3_600),
        (Timeframe::H1, 7_200),
        (Timeframe::H2, 14_400),
        (Timeframe::H4, 28_800),
        (Timeframe::H12, 86_400),
        (Timeframe::D1, 172_800),
    ])
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::for_profile(StoreProfile::Prod, "./data/bars")
    }
}

impl StoreConfig {
    /// 프로필 프리셋으로 설정을 생성합니다.
    pub fn for_profile(profile: StoreProfile, base_dir: impl Into<PathBuf>) -> Self {
        let base = Self {
            namespace: profile.namespace().to_string(),
            base_dir: base_dir.into(),
            redis_ttl_secs: default_redis_ttls(),
            default_redis_ttl_secs: 3_600,
            ram_limit_mb: 512.0,
            max_symbols_hot: 200,
            hot_ttl_secs: 900,
            warm_ttl_secs: 3_600,
            write_behind: true,
            flush_batch_max: 32,
            flush_queue_soft: 256,
            flush_queue_hard: 1_024,
            validate_on_read: false,
            validate_on_write: true,
            io_retry_attempts: 3,
            io_retry_backoff_ms: 100,
        };

        match profile {
            StoreProfile::Prod => base,
            StoreProfile::Local => Self {
                ram_limit_mb: 128.0,
                max_symbols_hot: 50,
                validate_on_read: true,
                ..base
            },
            StoreProfile::Test => Self {
                ram_limit_mb: 16.0,
                max_symbols_hot: 16,
                validate_on_read: true,
                flush_batch_max: 4,
                flush_queue_soft: 8,
                flush_queue_hard: 16,
                io_retry_attempts: 2,
                io_retry_backoff_ms: 1,
                ..base
            },
        }
    }

    /// 설정 파일과 `BARSTORE__*` 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("BARSTORE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: StoreConfig = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 환경 변수(.env 포함)에서 설정을 로드합니다.
    ///
    /// `BARSTORE_PROFILE`로 프리셋을 고른 뒤 개별 값을 덮어씁니다.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let profile = match std::env::var("BARSTORE_PROFILE") {
            Ok(v) => v.parse()?,
            Err(_) => StoreProfile::default(),
        };
        let base_dir = std::env::var("BARSTORE_BASE_DIR").unwrap_or_else(|_| "./data/bars".into());
        let base = Self::for_profile(profile, base_dir);

        let config = Self {
            namespace: std::env::var("BARSTORE_NAMESPACE").unwrap_or(base.namespace.clone()),
            ram_limit_mb: env_var_parse("BARSTORE_RAM_LIMIT_MB", base.ram_limit_mb),
            max_symbols_hot: env_var_parse("BARSTORE_MAX_SYMBOLS_HOT", base.max_symbols_hot),
            hot_ttl_secs: env_var_parse("BARSTORE_HOT_TTL_SECS", base.hot_ttl_secs),
            warm_ttl_secs: env_var_parse("BARSTORE_WARM_TTL_SECS", base.warm_ttl_secs),
            write_behind: env_var_bool("BARSTORE_WRITE_BEHIND", base.write_behind),
            flush_batch_max: env_var_parse("BARSTORE_FLUSH_BATCH_MAX", base.flush_batch_max),
            flush_queue_soft: env_var_parse("BARSTORE_FLUSH_QUEUE_SOFT", base.flush_queue_soft),
            flush_queue_hard: env_var_parse("BARSTORE_FLUSH_QUEUE_HARD", base.flush_queue_hard),
            validate_on_read: env_var_bool("BARSTORE_VALIDATE_ON_READ", base.validate_on_read),
            validate_on_write: env_var_bool("BARSTORE_VALIDATE_ON_WRITE", base.validate_on_write),
            io_retry_attempts: env_var_parse("BARSTORE_IO_RETRY_ATTEMPTS", base.io_retry_attempts),
            io_retry_backoff_ms: env_var_parse(
                "BARSTORE_IO_RETRY_BACKOFF_MS",
                base.io_retry_backoff_ms,
            ),
            ..base
        };

        config.validate()?;
        Ok(config)
    }

    /// 값의 일관성을 검사합니다.
    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(StoreError::Config("namespace가 비어 있습니다".into()));
        }
        if self.ram_limit_mb.is_nan() || self.ram_limit_mb <= 0.0 {
            return Err(StoreError::Config(format!(
                "ram_limit_mb는 양수여야 합니다: {}",
                self.ram_limit_mb
            )));
        }
        if self.max_symbols_hot == 0 {
            return Err(StoreError::Config("max_symbols_hot은 1 이상이어야 합니다".into()));
        }
        if self.flush_batch_max == 0 {
            return Err(StoreError::Config("flush_batch_max는 1 이상이어야 합니다".into()));
        }
        if self.flush_queue_soft > self.flush_queue_hard {
            return Err(StoreError::Config(format!(
                "flush_queue_soft({}) > flush_queue_hard({})",
                self.flush_queue_soft, self.flush_queue_hard
            )));
        }
        Ok(())
    }

    /// 타임프레임의 Redis TTL (초).
    pub fn redis_ttl_for(&self, timeframe: Timeframe) -> u64 {
        self.redis_ttl_secs
            .get(&timeframe)
            .copied()
            .unwrap_or(self.default_redis_ttl_secs)
    }

    /// 타임프레임의 RAM TTL.
    pub fn ram_ttl_for(&self, timeframe: Timeframe) -> Duration {
        if timeframe.is_fast() {
            Duration::from_secs(self.hot_ttl_secs)
        } else {
            Duration::from_secs(self.warm_ttl_secs)
        }
    }

    /// RAM 상한 (바이트).
    pub fn ram_limit_bytes(&self) -> usize {
        (self.ram_limit_mb * 1024.0 * 1024.0) as usize
    }

    pub fn io_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.io_retry_backoff_ms)
    }

    /// I/O 재시도 정책.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.io_retry_attempts, self.io_retry_backoff())
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
