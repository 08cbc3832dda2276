//! 전역 구독자 설치 테스트
//!
//! 구독자는 프로세스당 한 번만 설치되므로 별도 테스트 바이너리로 둡니다.

use bar_core::{init_logging, series_span, LogConfig, LogFormat, Timeframe};

#[test]
fn test_init_logging_installs_once() {
    let config = LogConfig::new("bar_core=debug").with_format(LogFormat::Compact);
    assert!(init_logging(config).is_ok());

    let span = series_span!("put_bars", "btcusdt", Timeframe::M1);
    let _entered = span.enter();
    tracing::debug!(rows = 3, "구독자 설치 후 이벤트");

    // 두 번째 설치는 거부
    assert!(init_logging(LogConfig::from_env().with_format(LogFormat::Json)).is_err());
}
