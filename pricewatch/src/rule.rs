use serde::{Deserialize, Serialize};

use crate::bar::Bar;
use crate::constant::{
    Combinator, Comparator, FrequencyKind, PriceField, RuleError, TargetKind,
};
use crate::window::WindowPolicy;

pub type RuleId = u64;

/// 意图解析服务输出的单条比较条件（未校验）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseSpec {
    #[serde(alias = "type")]
    pub field: PriceField,
    #[serde(alias = "comparison")]
    pub comparator: Comparator,
    pub target: TargetKind,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationSpec {
    #[serde(default)]
    pub frequency: FrequencyKind,
    #[serde(default)]
    pub interval: Option<i64>,
}

/// 注册入参：`{clauses, combinator, notification, rawDescription}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    #[serde(alias = "conditions")]
    pub clauses: Vec<ClauseSpec>,
    #[serde(default, alias = "operator")]
    pub combinator: Combinator,
    #[serde(default)]
    pub notification: NotificationSpec,
    #[serde(rename = "rawDescription", alias = "description", default)]
    pub raw_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind", content = "value")]
pub enum Target {
    PreviousBar,
    FixedValue(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComparisonClause {
    pub field: PriceField,
    pub comparator: Comparator,
    pub target: Target,
}

impl ComparisonClause {
    pub fn new(field: PriceField, comparator: Comparator, target: Target) -> Self {
        Self {
            field,
            comparator,
            target,
        }
    }

    pub fn needs_previous(&self) -> bool {
        matches!(self.target, Target::PreviousBar)
    }

    /// `None` when the clause references a previous bar that does not exist.
    pub fn evaluate(&self, current: &Bar, previous: Option<&Bar>) -> Option<bool> {
        let reference = match self.target {
            Target::PreviousBar => previous?.value(self.field),
            Target::FixedValue(value) => value,
        };
        Some(self.comparator.holds(current.value(self.field), reference))
    }

    fn from_spec(index: usize, spec: &ClauseSpec) -> Result<Self, RuleError> {
        let target = match spec.target {
            TargetKind::PreviousBar => Target::PreviousBar,
            TargetKind::FixedValue => match spec.value {
                Some(value) if value.is_finite() => Target::FixedValue(value),
                _ => return Err(RuleError::MissingFixedValue { index }),
            },
        };
        Ok(Self::new(spec.field, spec.comparator, target))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "frequency")]
pub enum Frequency {
    Immediate,
    Interval { interval_ms: i64 },
}

impl Frequency {
    pub fn from_spec(spec: NotificationSpec, default_interval_ms: i64) -> Result<Self, RuleError> {
        match spec.frequency {
            FrequencyKind::Immediate => Ok(Self::Immediate),
            FrequencyKind::Interval => {
                let interval_ms = spec.interval.unwrap_or(default_interval_ms);
                if interval_ms <= 0 {
                    return Err(RuleError::InvalidInterval(interval_ms));
                }
                Ok(Self::Interval { interval_ms })
            }
        }
    }

    /// A missing `last_notified_at` counts as 0, so the first bar always passes.
    pub fn permits(self, bar_timestamp: i64, last_notified_at: Option<i64>) -> bool {
        match self {
            Self::Immediate => true,
            Self::Interval { interval_ms } => {
                bar_timestamp.saturating_sub(last_notified_at.unwrap_or(0)) >= interval_ms
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub subscriber_id: String,
    pub clauses: Vec<ComparisonClause>,
    pub combinator: Combinator,
    pub frequency: Frequency,
    pub window_policy: Option<WindowPolicy>,
    /// Description as submitted, without window annotations.
    pub raw_description: String,
    /// Human readable description, including the resolved windows if any.
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Rule {
    pub fn needs_previous(&self) -> bool {
        self.clauses.iter().any(ComparisonClause::needs_previous)
    }

    /// 条件组合求值；引用前一根 bar 但其不存在时视为不满足。
    pub fn is_satisfied(&self, current: &Bar, previous: Option<&Bar>) -> bool {
        if self.clauses.is_empty() || (self.needs_previous() && previous.is_none()) {
            return false;
        }
        let mut results = self
            .clauses
            .iter()
            .map(|clause| clause.evaluate(current, previous).unwrap_or(false));
        match self.combinator {
            Combinator::And => results.all(|x| x),
            Combinator::Or => results.any(|x| x),
        }
    }
}

pub(crate) fn validate_clauses(specs: &[ClauseSpec]) -> Result<Vec<ComparisonClause>, RuleError> {
    if specs.is_empty() {
        return Err(RuleError::EmptyClauses);
    }
    specs
        .iter()
        .enumerate()
        .map(|(index, spec)| ComparisonClause::from_spec(index, spec))
        .collect()
}
