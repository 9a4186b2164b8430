use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::rule::RuleId;

/// 待投递的通知请求，由评估器创建、交给投递队列持有。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub subscriber_id: String,
    pub rule_id: RuleId,
    pub message: String,
    /// OHLC snapshot delivered as the `data` part of the outbound event.
    pub bar: Bar,
    pub created_at: i64,
    pub retry_count: u32,
}

impl NotificationRequest {
    pub fn new(subscriber_id: impl Into<String>, rule_id: RuleId, message: String, bar: Bar) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            rule_id,
            message,
            bar,
            created_at: Utc::now().timestamp_millis(),
            retry_count: 0,
        }
    }
}

pub fn render_message(description: &str, bar: &Bar, offset: FixedOffset) -> String {
    let at = bar
        .local_datetime(offset)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| bar.timestamp.to_string());
    format!(
        "Price alert - {at}\n\
         Condition: {description}\n\
         Current bar:\n\
         - open: {}\n\
         - high: {}\n\
         - low: {}\n\
         - close: {}",
        bar.open_price, bar.high_price, bar.low_price, bar.close_price
    )
}
