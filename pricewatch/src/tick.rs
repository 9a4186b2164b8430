use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bar::{Bar, BarEvent};
use crate::constant::{Const, TickError};

/// 上游原始报价：`(timestampMs, price)`。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickInput {
    pub timestamp: i64,
    pub price: f64,
}

impl TickInput {
    pub fn new(timestamp: i64, price: f64) -> Self {
        Self { timestamp, price }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub symbol: String,
    pub bucket_ms: i64,
    pub history_capacity: usize,
    /// Ticks older than the newest accepted timestamp by more than this are rejected.
    pub max_lag_ms: i64,
    pub intermediate_throttle_ms: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            symbol: Const::DEFAULT_SYMBOL.to_string(),
            bucket_ms: Const::DEFAULT_BUCKET_MS,
            history_capacity: Const::DEFAULT_HISTORY_CAPACITY,
            max_lag_ms: Const::DEFAULT_BUCKET_MS,
            intermediate_throttle_ms: Const::DEFAULT_INTERMEDIATE_THROTTLE_MS,
        }
    }
}

pub struct TickBarAggregator {
    config: AggregatorConfig,
    current_bar: Option<Bar>,
    last_timestamp: Option<i64>,
    last_emitted_slot: Option<i64>,
    history: VecDeque<Bar>,
}

impl Default for TickBarAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TickBarAggregator {
    pub fn new() -> Self {
        Self::with_config(AggregatorConfig::default())
    }

    pub fn with_config(mut config: AggregatorConfig) -> Self {
        config.bucket_ms = config.bucket_ms.max(1);
        config.history_capacity = config.history_capacity.max(1);
        config.max_lag_ms = config.max_lag_ms.max(0);
        config.intermediate_throttle_ms = config.intermediate_throttle_ms.max(1);
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            current_bar: None,
            last_timestamp: None,
            last_emitted_slot: None,
        }
    }

    /// 处理一条 tick。
    ///
    /// 每条 tick 至多产生一个事件：跨桶时返回上一根已完成的 bar，
    /// 桶内更新时按节流水位返回中间快照。被拒绝的 tick 不改变任何状态。
    pub fn update(&mut self, tick: TickInput) -> Result<Option<BarEvent>, TickError> {
        self.validate(tick)?;

        let bucket = tick.timestamp - tick.timestamp.rem_euclid(self.config.bucket_ms);
        let event = match self.current_bar.as_mut() {
            None => {
                self.current_bar = Some(Bar::opened(&self.config.symbol, bucket, tick.price));
                None
            }
            Some(bar) if bar.timestamp == bucket => {
                bar.absorb(tick.price);
                let slot = tick.timestamp.div_euclid(self.config.intermediate_throttle_ms);
                if self.last_emitted_slot.is_none_or(|last| slot > last) {
                    self.last_emitted_slot = Some(slot);
                    Some(BarEvent::intermediate(bar.clone()))
                } else {
                    None
                }
            }
            Some(bar) if bucket < bar.timestamp => {
                return Err(TickError::StaleTimestamp {
                    timestamp: tick.timestamp,
                    last: self.last_timestamp.unwrap_or(bar.timestamp),
                });
            }
            Some(_) => {
                let finished = self
                    .current_bar
                    .replace(Bar::opened(&self.config.symbol, bucket, tick.price));
                finished.map(|bar| {
                    self.remember(bar.clone());
                    debug!(symbol = %bar.symbol, timestamp = bar.timestamp, close = bar.close_price, "bar finalized");
                    BarEvent::finalized(bar)
                })
            }
        };

        self.last_timestamp = Some(
            self.last_timestamp
                .map_or(tick.timestamp, |last| last.max(tick.timestamp)),
        );
        Ok(event)
    }

    /// 在没有后续 tick 的情况下结束当前 bar（例如停机时）。
    pub fn flush(&mut self) -> Option<BarEvent> {
        let bar = self.current_bar.take()?;
        self.remember(bar.clone());
        Some(BarEvent::finalized(bar))
    }

    pub fn current(&self) -> Option<&Bar> {
        self.current_bar.as_ref()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.history.back()
    }

    pub fn history(&self) -> impl Iterator<Item = &Bar> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    fn validate(&self, tick: TickInput) -> Result<(), TickError> {
        if !tick.price.is_finite() {
            return Err(TickError::NonFinitePrice(tick.price));
        }
        if tick.price <= 0.0 {
            return Err(TickError::NonPositivePrice(tick.price));
        }
        if let Some(last) = self.last_timestamp {
            if tick.timestamp.saturating_add(self.config.max_lag_ms) < last {
                return Err(TickError::StaleTimestamp {
                    timestamp: tick.timestamp,
                    last,
                });
            }
        }
        Ok(())
    }

    fn remember(&mut self, bar: Bar) {
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(bar);
    }
}
