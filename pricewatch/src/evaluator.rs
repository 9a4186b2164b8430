use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::{debug, info};

use crate::bar::Bar;
use crate::constant::{Const, RuleError};
use crate::id_generator::IdGenerator;
use crate::notification::{render_message, NotificationRequest};
use crate::rule::{validate_clauses, Frequency, Rule, RuleId, RuleSpec};
use crate::window::{BracketWindowParser, WindowPolicy, WindowSpecParser};

#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    /// 将 bar 时间换算为墙钟 HH:mm 时使用的时区。
    pub utc_offset: FixedOffset,
    pub default_interval_ms: i64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            default_interval_ms: Const::DEFAULT_INTERVAL_MS,
        }
    }
}

impl EvaluatorConfig {
    pub fn with_offset_minutes(offset_minutes: i32) -> Self {
        let utc_offset = FixedOffset::east_opt(offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix());
        Self {
            utc_offset,
            ..Self::default()
        }
    }
}

/// 规则仓库：按 id 保存全部订阅规则，注册时分配 id 并解析时间窗口。
pub struct RuleStore {
    rules: RwLock<BTreeMap<RuleId, Arc<Rule>>>,
    ids: IdGenerator,
    parser: Box<dyn WindowSpecParser>,
    config: EvaluatorConfig,
}

impl Default for RuleStore {
    fn default() -> Self {
        Self::new(EvaluatorConfig::default())
    }
}

impl RuleStore {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self::with_parser(config, Box::new(BracketWindowParser::default()))
    }

    pub fn with_parser(config: EvaluatorConfig, parser: Box<dyn WindowSpecParser>) -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
            ids: IdGenerator::default(),
            parser,
            config,
        }
    }

    pub fn register(&self, subscriber_id: &str, spec: RuleSpec) -> Result<Rule, RuleError> {
        self.register_at(subscriber_id, spec, Utc::now())
    }

    pub fn register_at(
        &self,
        subscriber_id: &str,
        spec: RuleSpec,
        now: DateTime<Utc>,
    ) -> Result<Rule, RuleError> {
        let clauses = validate_clauses(&spec.clauses)?;
        let frequency = Frequency::from_spec(spec.notification, self.config.default_interval_ms)?;

        let window_policy = self.resolve_windows(&spec.raw_description, now);
        let description = match &window_policy {
            Some(policy) => policy.annotate(&spec.raw_description),
            None => spec.raw_description.clone(),
        };

        let now_ms = now.timestamp_millis();
        let rule = Rule {
            id: self.ids.next_id(),
            subscriber_id: subscriber_id.to_string(),
            clauses,
            combinator: spec.combinator,
            frequency,
            window_policy,
            raw_description: spec.raw_description,
            description,
            created_at: now_ms,
            updated_at: now_ms,
        };

        info!(
            rule_id = rule.id,
            subscriber = %rule.subscriber_id,
            clauses = rule.clauses.len(),
            windowed = rule.window_policy.is_some(),
            "rule registered"
        );
        self.rules
            .write()
            .expect("rule store lock poisoned")
            .insert(rule.id, Arc::new(rule.clone()));
        Ok(rule)
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules
            .read()
            .expect("rule store lock poisoned")
            .get(&id)
            .map(|rule| rule.as_ref().clone())
    }

    pub fn by_subscriber(&self, subscriber_id: &str) -> Vec<Rule> {
        self.rules
            .read()
            .expect("rule store lock poisoned")
            .values()
            .filter(|rule| rule.subscriber_id == subscriber_id)
            .map(|rule| rule.as_ref().clone())
            .collect()
    }

    pub fn rules(&self) -> Vec<Arc<Rule>> {
        self.rules
            .read()
            .expect("rule store lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("rule store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> EvaluatorConfig {
        self.config
    }

    fn resolve_windows(&self, description: &str, now: DateTime<Utc>) -> Option<WindowPolicy> {
        if !self.parser.mentions_windows(description) {
            return None;
        }
        let policy = match self.parser.parse(description) {
            Some(windows) => WindowPolicy::new(windows),
            None => {
                debug!("no explicit window spec in description, using defaults");
                WindowPolicy::default_from(now, self.config.utc_offset)
            }
        };
        Some(policy)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleEvalState {
    pub last_notified_at: Option<i64>,
}

/// 每次 bar 推送时遍历全部规则：节流 -> 时间窗口 -> 条件求值。
///
/// 评估状态只由本结构持有；前一根 bar 在本轮全部规则评估完毕后才推进。
pub struct RuleEvaluator {
    store: Arc<RuleStore>,
    states: HashMap<RuleId, RuleEvalState>,
    previous_bar: Option<Bar>,
}

impl RuleEvaluator {
    pub fn new(store: Arc<RuleStore>) -> Self {
        Self {
            store,
            states: HashMap::new(),
            previous_bar: None,
        }
    }

    pub fn on_bar(&mut self, bar: &Bar) -> Vec<NotificationRequest> {
        let offset = self.store.config().utc_offset;
        let previous = self.previous_bar.as_ref();
        let mut requests = Vec::new();

        for rule in self.store.rules() {
            let state = self.states.entry(rule.id).or_default();
            if !rule.frequency.permits(bar.timestamp, state.last_notified_at) {
                continue;
            }

            if let Some(policy) = &rule.window_policy {
                if !policy.admits(bar.timestamp, offset) {
                    debug!(rule_id = rule.id, timestamp = bar.timestamp, "bar outside rule windows");
                    continue;
                }
            }

            if !rule.is_satisfied(bar, previous) {
                continue;
            }

            state.last_notified_at = Some(bar.timestamp);
            let message = render_message(&rule.raw_description, bar, offset);
            debug!(rule_id = rule.id, subscriber = %rule.subscriber_id, "rule fired");
            requests.push(NotificationRequest::new(
                rule.subscriber_id.clone(),
                rule.id,
                message,
                bar.clone(),
            ));
        }

        self.previous_bar = Some(bar.clone());
        requests
    }

    pub fn state(&self, id: RuleId) -> RuleEvalState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    pub fn previous_bar(&self) -> Option<&Bar> {
        self.previous_bar.as_ref()
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }
}
