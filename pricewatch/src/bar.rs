use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::constant::{BarKind, PriceField};

/// 固定时间桶内的 OHLC 汇总，`timestamp` 为桶起始时刻（毫秒）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: i64,
    #[serde(rename = "open")]
    pub open_price: f64,
    #[serde(rename = "high")]
    pub high_price: f64,
    #[serde(rename = "low")]
    pub low_price: f64,
    #[serde(rename = "close")]
    pub close_price: f64,
}

impl Bar {
    pub fn opened(symbol: impl Into<String>, timestamp: i64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            open_price: price,
            high_price: price,
            low_price: price,
            close_price: price,
        }
    }

    pub fn value(&self, field: PriceField) -> f64 {
        match field {
            PriceField::Open => self.open_price,
            PriceField::Close => self.close_price,
            PriceField::High => self.high_price,
            PriceField::Low => self.low_price,
        }
    }

    pub fn absorb(&mut self, price: f64) {
        self.high_price = self.high_price.max(price);
        self.low_price = self.low_price.min(price);
        self.close_price = price;
    }

    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }

    pub fn local_datetime(&self, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
        self.datetime().map(|dt| dt.with_timezone(&offset))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarEvent {
    pub bar: Bar,
    pub kind: BarKind,
}

impl BarEvent {
    pub fn intermediate(bar: Bar) -> Self {
        Self {
            bar,
            kind: BarKind::Intermediate,
        }
    }

    pub fn finalized(bar: Bar) -> Self {
        Self {
            bar,
            kind: BarKind::Finalized,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.kind == BarKind::Finalized
    }
}
