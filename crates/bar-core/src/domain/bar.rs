//! OHLCV 바.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 가격 타입.
pub type Price = Decimal;

/// 수량 타입.
pub type Quantity = Decimal;

/// OHLCV 바 하나.
///
/// `open_time`(epoch ms)이 한 (심볼, 타임프레임) 시계열 안의 자연 키입니다.
/// 가격은 디스크/Redis에 10진 문자열로 기록되며, 읽을 때는 문자열과 JSON
/// 숫자를 모두 받습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// 바 시작 시각 (epoch ms)
    pub open_time: i64,
    /// 시가
    pub open: Price,
    /// 고가
    pub high: Price,
    /// 저가
    pub low: Price,
    /// 종가
    pub close: Price,
    /// 거래량
    pub volume: Quantity,
    /// 바 종료 시각 (epoch ms)
    pub close_time: i64,
    /// 확정 여부. 거래소가 보내지 않으면 `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_closed: Option<bool>,
}

impl Bar {
    /// 새 바를 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        open_time: i64,
        open: Price,
        high: Price,
        low: Price,
        close: Price,
        volume: Quantity,
        close_time: i64,
    ) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume,
            close_time,
            is_closed: None,
        }
    }

    /// 확정 여부를 설정합니다.
    pub fn with_closed(mut self, closed: bool) -> Self {
        self.is_closed = Some(closed);
        self
    }

    /// 확정된 바인지 확인합니다.
    pub fn is_final(&self) -> bool {
        self.is_closed == Some(true)
    }

    /// 고가/저가 범위가 시가·종가를 감싸는지 확인합니다.
    pub fn has_valid_envelope(&self) -> bool {
        self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
            && self.low <= self.high
    }
}
