use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceField {
    Open,
    Close,
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Comparator {
    Higher,
    Lower,
}

impl Comparator {
    pub fn holds(self, current: f64, reference: f64) -> bool {
        match self {
            Self::Higher => current > reference,
            Self::Lower => current < reference,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    #[serde(alias = "PREVIOUS")]
    PreviousBar,
    FixedValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyKind {
    #[default]
    Immediate,
    Interval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarKind {
    Intermediate,
    Finalized,
}

pub struct Const;

impl Const {
    pub const DEFAULT_SYMBOL: &'static str = "BTC/USD";
    pub const DEFAULT_BUCKET_MS: i64 = 60_000;
    pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;
    pub const DEFAULT_INTERMEDIATE_THROTTLE_MS: i64 = 1000;
    pub const DEFAULT_INTERVAL_MS: i64 = 1000;
    pub const WINDOW_COUNT: usize = 3;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickError {
    NonFinitePrice(f64),
    NonPositivePrice(f64),
    StaleTimestamp { timestamp: i64, last: i64 },
}

impl Display for TickError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonFinitePrice(v) => write!(f, "non-finite price: {v}"),
            Self::NonPositivePrice(v) => write!(f, "non-positive price: {v}"),
            Self::StaleTimestamp { timestamp, last } => {
                write!(f, "stale tick timestamp {timestamp} (last accepted {last})")
            }
        }
    }
}

impl std::error::Error for TickError {}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleError {
    EmptyClauses,
    MissingFixedValue { index: usize },
    InvalidInterval(i64),
    UnknownRule(u64),
}

impl Display for RuleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyClauses => write!(f, "rule must contain at least one clause"),
            Self::MissingFixedValue { index } => {
                write!(f, "clause {index} targets FIXED_VALUE without a value")
            }
            Self::InvalidInterval(v) => write!(f, "invalid notification interval: {v}ms"),
            Self::UnknownRule(id) => write!(f, "unknown rule: {id}"),
        }
    }
}

impl std::error::Error for RuleError {}
