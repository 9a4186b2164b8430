pub mod bar;
pub mod constant;
pub mod evaluator;
pub mod id_generator;
pub mod logging;
pub mod notification;
pub mod rule;
pub mod tick;
pub mod window;

pub use bar::{Bar, BarEvent};
pub use constant::{
    BarKind, Combinator, Comparator, Const, FrequencyKind, PriceField, RuleError, TargetKind,
    TickError,
};
pub use evaluator::{EvaluatorConfig, RuleEvalState, RuleEvaluator, RuleStore};
pub use id_generator::IdGenerator;
pub use logging::{init_logging, init_logging_with_level};
pub use notification::{render_message, NotificationRequest};
pub use rule::{
    ClauseSpec, ComparisonClause, Frequency, NotificationSpec, Rule, RuleId, RuleSpec, Target,
};
pub use tick::{AggregatorConfig, TickBarAggregator, TickInput};
pub use window::{BracketWindowParser, TimeWindow, WindowPolicy, WindowSpecParser};
