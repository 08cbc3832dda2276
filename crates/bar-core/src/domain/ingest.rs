//! 수집 경계 메시지.
//!
//! 외부 수집기(WebSocket, pub/sub 등)가 넘겨주는 페이로드는 여기서 한 번만
//! 검증되고 즉시 `Bar`/`BarBatch`로 변환됩니다. 저장소 코어는 타입이 없는
//! 맵을 다시 들여다보지 않습니다.

use crate::domain::bar::{Bar, Price};
use crate::error::{CoreError, CoreResult};
use crate::types::Timeframe;
use serde::Deserialize;

/// 외부 수집 메시지 종류.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestMessage {
    /// OHLCV 배치
    Ohlcv {
        symbol: String,
        interval: Timeframe,
        bars: Vec<Bar>,
    },
    /// 단일 체결가
    Tick {
        symbol: String,
        price: Price,
        ts: i64,
    },
    /// 피드 상태 알림
    Status {
        source: String,
        connected: bool,
        #[serde(default)]
        detail: Option<String>,
    },
}

/// 검증을 통과한 OHLCV 배치.
#[derive(Debug, Clone, PartialEq)]
pub struct BarBatch {
    /// 소문자로 정규화된 심볼
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<Bar>,
}

impl IngestMessage {
    /// JSON 문자열을 파싱합니다.
    pub fn parse(raw: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// OHLCV 메시지를 검증된 배치로 변환합니다.
    ///
    /// 틱/상태 메시지는 바를 만들지 않으므로 `Ok(None)`을 반환합니다.
    pub fn into_batch(self) -> CoreResult<Option<BarBatch>> {
        match self {
            IngestMessage::Ohlcv {
                symbol,
                interval,
                bars,
            } => {
                let symbol = normalize_symbol(&symbol)?;
                if bars.is_empty() {
                    return Err(CoreError::InvalidInput(format!(
                        "{} {} 배치에 바가 없습니다",
                        symbol, interval
                    )));
                }
                if let Some(bad) = bars
                    .iter()
                    .find(|b| !b.has_valid_envelope() || b.close_time < b.open_time)
                {
                    return Err(CoreError::Validation(format!(
                        "{} {} open_time={} 범위 오류",
                        symbol, interval, bad.open_time
                    )));
                }
                Ok(Some(BarBatch {
                    symbol,
                    timeframe: interval,
                    bars,
                }))
            }
            IngestMessage::Tick { .. } | IngestMessage::Status { .. } => Ok(None),
        }
    }
}

/// 심볼을 저장소 키 형식(소문자, 공백 제거)으로 정규화합니다.
pub fn normalize_symbol(symbol: &str) -> CoreResult<String> {
    let trimmed = symbol.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidInput("빈 심볼".to_string()));
    }
    if trimmed.contains(':') || trimmed.contains('/') {
        return Err(CoreError::InvalidInput(format!(
            "심볼에 사용할 수 없는 문자: {}",
            trimmed
        )));
    }
    Ok(trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ohlcv_message_into_batch() {
        let raw = r#"{
            "type": "ohlcv",
            "symbol": "XAUUSD",
            "interval": "1m",
            "bars": [
                {"open_time": 0, "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 10, "close_time": 59999}
            ]
        }"#;
        let batch = IngestMessage::parse(raw).unwrap().into_batch().unwrap().unwrap();
        assert_eq!(batch.symbol, "xauusd");
        assert_eq!(batch.timeframe, Timeframe::M1);
        assert_eq!(batch.bars.len(), 1);
    }

    #[test]
    fn test_tick_and_status_produce_no_batch() {
        let tick = IngestMessage::parse(r#"{"type":"tick","symbol":"btc","price":"1.5","ts":1}"#)
            .unwrap();
        assert!(tick.into_batch().unwrap().is_none());

        let status =
            IngestMessage::parse(r#"{"type":"status","source":"ws","connected":false}"#).unwrap();
        assert!(status.into_batch().unwrap().is_none());
    }

    #[test]
    fn test_rejects_bad_envelope_and_empty_batch() {
        let bad = r#"{"type":"ohlcv","symbol":"btc","interval":"1m","bars":[
            {"open_time":0,"open":5,"high":2,"low":1,"close":1,"volume":1,"close_time":59999}]}"#;
        assert!(matches!(
            IngestMessage::parse(bad).unwrap().into_batch(),
            Err(CoreError::Validation(_))
        ));

        let empty = r#"{"type":"ohlcv","symbol":"btc","interval":"1m","bars":[]}"#;
        assert!(matches!(
            IngestMessage::parse(empty).unwrap().into_batch(),
            Err(CoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(IngestMessage::parse(r#"{"type":"depth","symbol":"btc"}"#).is_err());
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol(" BTCUSDT ").unwrap(), "btcusdt");
        assert!(normalize_symbol("").is_err());
        assert!(normalize_symbol("a:b").is_err());
    }
}
