use std::sync::Arc;

use chrono::{TimeZone, Utc};
use pricewatch::{
    Bar, ClauseSpec, Combinator, Comparator, EvaluatorConfig, Frequency, FrequencyKind,
    NotificationSpec, PriceField, RuleError, RuleEvaluator, RuleSpec, RuleStore, TargetKind,
};

fn bar(timestamp: i64, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        symbol: "BTC/USD".to_string(),
        timestamp,
        open_price: open,
        high_price: high,
        low_price: low,
        close_price: close,
    }
}

fn close_bar(timestamp: i64, close: f64) -> Bar {
    bar(timestamp, close, close, close, close)
}

fn fixed(field: PriceField, comparator: Comparator, value: f64) -> ClauseSpec {
    ClauseSpec {
        field,
        comparator,
        target: TargetKind::FixedValue,
        value: Some(value),
    }
}

fn previous(field: PriceField, comparator: Comparator) -> ClauseSpec {
    ClauseSpec {
        field,
        comparator,
        target: TargetKind::PreviousBar,
        value: None,
    }
}

fn spec(clauses: Vec<ClauseSpec>, combinator: Combinator, description: &str) -> RuleSpec {
    RuleSpec {
        clauses,
        combinator,
        notification: NotificationSpec::default(),
        raw_description: description.to_string(),
    }
}

fn setup() -> (Arc<RuleStore>, RuleEvaluator) {
    let store = Arc::new(RuleStore::default());
    let evaluator = RuleEvaluator::new(Arc::clone(&store));
    (store, evaluator)
}

#[test]
fn fixed_threshold_fires_only_when_crossed() {
    let (store, mut evaluator) = setup();
    store
        .register(
            "alice",
            spec(
                vec![fixed(PriceField::Close, Comparator::Higher, 100.0)],
                Combinator::And,
                "close above 100",
            ),
        )
        .expect("valid rule");

    let fired = [95.0, 101.0, 99.0]
        .iter()
        .enumerate()
        .map(|(i, close)| evaluator.on_bar(&close_bar(i as i64 * 60_000, *close)).len())
        .collect::<Vec<_>>();

    assert_eq!(fired, vec![0, 1, 0]);
}

#[test]
fn previous_bar_clauses_need_a_predecessor() {
    let (store, mut evaluator) = setup();
    store
        .register(
            "bob",
            spec(
                vec![
                    previous(PriceField::Open, Comparator::Lower),
                    previous(PriceField::Close, Comparator::Higher),
                ],
                Combinator::And,
                "lower open, higher close",
            ),
        )
        .expect("valid rule");

    assert!(evaluator.on_bar(&bar(0, 10.0, 12.0, 10.0, 12.0)).is_empty());
    let requests = evaluator.on_bar(&bar(60_000, 9.0, 13.0, 9.0, 13.0));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].subscriber_id, "bob");
    assert_eq!(requests[0].bar.close_price, 13.0);
    assert_eq!(requests[0].retry_count, 0);
}

#[test]
fn or_combinator_needs_any_clause() {
    let (store, mut evaluator) = setup();
    store
        .register(
            "carol",
            spec(
                vec![
                    fixed(PriceField::High, Comparator::Higher, 200.0),
                    fixed(PriceField::Low, Comparator::Lower, 50.0),
                ],
                Combinator::Or,
                "breakout either way",
            ),
        )
        .expect("valid rule");

    assert!(evaluator.on_bar(&bar(0, 100.0, 120.0, 80.0, 100.0)).is_empty());
    assert_eq!(evaluator.on_bar(&bar(60_000, 100.0, 120.0, 40.0, 100.0)).len(), 1);
    assert_eq!(evaluator.on_bar(&bar(120_000, 100.0, 210.0, 90.0, 100.0)).len(), 1);
}

#[test]
fn previous_bar_is_frozen_while_rules_are_evaluated() {
    let (store, mut evaluator) = setup();
    for subscriber in ["a", "b", "c"] {
        store
            .register(
                subscriber,
                spec(
                    vec![previous(PriceField::Close, Comparator::Higher)],
                    Combinator::And,
                    "rising close",
                ),
            )
            .expect("valid rule");
    }

    assert!(evaluator.on_bar(&close_bar(0, 10.0)).is_empty());
    assert_eq!(evaluator.on_bar(&close_bar(60_000, 11.0)).len(), 3);
    assert_eq!(evaluator.previous_bar().map(|b| b.close_price), Some(11.0));
}

#[test]
fn interval_policy_throttles_by_bar_time() {
    let (store, mut evaluator) = setup();
    let rule = store
        .register(
            "dave",
            RuleSpec {
                clauses: vec![fixed(PriceField::Close, Comparator::Higher, 0.0)],
                combinator: Combinator::And,
                notification: NotificationSpec {
                    frequency: FrequencyKind::Interval,
                    interval: Some(120_000),
                },
                raw_description: "every two minutes".to_string(),
            },
        )
        .expect("valid rule");
    assert_eq!(rule.frequency, Frequency::Interval { interval_ms: 120_000 });

    let base = 1_700_000_040_000;
    let fired = (0..5)
        .map(|i| !evaluator.on_bar(&close_bar(base + i * 60_000, 1.0)).is_empty())
        .collect::<Vec<_>>();
    assert_eq!(fired, vec![true, false, true, false, true]);
    assert_eq!(evaluator.state(rule.id).last_notified_at, Some(base + 240_000));
}

#[test]
fn interval_without_value_defaults_to_one_second() {
    let store = RuleStore::default();
    let rule = store
        .register(
            "erin",
            RuleSpec {
                clauses: vec![fixed(PriceField::Close, Comparator::Lower, 10.0)],
                combinator: Combinator::And,
                notification: NotificationSpec {
                    frequency: FrequencyKind::Interval,
                    interval: None,
                },
                raw_description: String::new(),
            },
        )
        .expect("valid rule");
    assert_eq!(rule.frequency, Frequency::Interval { interval_ms: 1000 });
}

#[test]
fn window_policy_gates_firing() {
    let store = Arc::new(RuleStore::new(EvaluatorConfig::with_offset_minutes(0)));
    let mut evaluator = RuleEvaluator::new(Arc::clone(&store));
    let rule = store
        .register(
            "frank",
            spec(
                vec![fixed(PriceField::Close, Comparator::Higher, 0.0)],
                Combinator::And,
                "收盘价为正 时间窗口[09:00-10:00, 09:30-10:30, 09:45-11:00]",
            ),
        )
        .expect("valid rule");
    assert!(rule.window_policy.is_some());
    assert!(rule.description.contains("- 09:45 - 11:00"));

    let outside = Utc.with_ymd_and_hms(2025, 3, 1, 9, 40, 0).unwrap().timestamp_millis();
    let inside = Utc.with_ymd_and_hms(2025, 3, 1, 9, 50, 0).unwrap().timestamp_millis();
    assert!(evaluator.on_bar(&close_bar(outside, 5.0)).is_empty());

    let requests = evaluator.on_bar(&close_bar(inside, 5.0));
    assert_eq!(requests.len(), 1);
    // the message carries the description without the window annotation
    assert!(requests[0].message.contains("Condition: 收盘价为正 时间窗口[09:00-10:00"));
    assert!(!requests[0].message.contains("已启用时间窗口监控"));
    assert!(requests[0].message.contains("- close: 5"));
}

#[test]
fn malformed_window_spec_falls_back_to_defaults() {
    let store = RuleStore::default();
    let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    let rule = store
        .register_at(
            "grace",
            spec(
                vec![fixed(PriceField::Close, Comparator::Higher, 1.0)],
                Combinator::And,
                "时间窗口[12:00-13:00]",
            ),
            now,
        )
        .expect("fallback does not fail registration");

    let policy = rule.window_policy.expect("defaults synthesized");
    let starts = policy
        .windows
        .iter()
        .map(|w| w.start.format("%H:%M").to_string())
        .collect::<Vec<_>>();
    assert_eq!(starts, vec!["12:01", "12:02", "12:03"]);
    assert!(rule.description.starts_with("时间窗口[12:00-13:00]\n\n"));
}

#[test]
fn rules_without_keywords_have_no_windows() {
    let store = RuleStore::default();
    let rule = store
        .register(
            "heidi",
            spec(
                vec![fixed(PriceField::Close, Comparator::Higher, 1.0)],
                Combinator::And,
                "plain rule",
            ),
        )
        .expect("valid rule");
    assert!(rule.window_policy.is_none());
    assert_eq!(rule.description, "plain rule");
    assert_eq!(rule.created_at, rule.updated_at);
}

#[test]
fn invalid_specs_are_rejected() {
    let store = RuleStore::default();
    assert_eq!(
        store.register("ivan", spec(Vec::new(), Combinator::And, "nothing")),
        Err(RuleError::EmptyClauses)
    );

    let missing_value = ClauseSpec {
        field: PriceField::Close,
        comparator: Comparator::Higher,
        target: TargetKind::FixedValue,
        value: None,
    };
    assert_eq!(
        store.register("ivan", spec(vec![missing_value], Combinator::And, "no value")),
        Err(RuleError::MissingFixedValue { index: 0 })
    );
    assert!(store.is_empty());
}

#[test]
fn lookups_by_id_and_subscriber() {
    let store = RuleStore::default();
    let first = store
        .register("judy", spec(vec![fixed(PriceField::Low, Comparator::Lower, 5.0)], Combinator::And, "one"))
        .expect("valid rule");
    let second = store
        .register("judy", spec(vec![fixed(PriceField::High, Comparator::Higher, 9.0)], Combinator::And, "two"))
        .expect("valid rule");
    let _ = store
        .register("mallory", spec(vec![fixed(PriceField::Open, Comparator::Higher, 1.0)], Combinator::And, "three"))
        .expect("valid rule");

    assert_ne!(first.id, second.id);
    assert_eq!(store.get(first.id), Some(first.clone()));
    assert_eq!(store.get(0), None);

    let judy = store.by_subscriber("judy");
    assert_eq!(judy.len(), 2);
    assert!(judy.iter().all(|rule| rule.subscriber_id == "judy"));
    assert!(store.by_subscriber("nobody").is_empty());
    assert_eq!(store.len(), 3);
}

#[test]
fn rule_spec_deserializes_from_translator_json() {
    let payload = r#"{
        "conditions": [
            {"type": "CLOSE", "comparison": "HIGHER", "target": "FIXED_VALUE", "value": 100},
            {"type": "OPEN", "comparison": "LOWER", "target": "PREVIOUS"}
        ],
        "operator": "OR",
        "notification": {"frequency": "INTERVAL", "interval": 60000},
        "rawDescription": "收盘价高于100或开盘价低于前一根"
    }"#;
    let parsed: RuleSpec = serde_json::from_str(payload).expect("translator payload parses");
    assert_eq!(parsed.clauses.len(), 2);
    assert_eq!(parsed.combinator, Combinator::Or);
    assert_eq!(parsed.clauses[1].target, TargetKind::PreviousBar);
    assert_eq!(parsed.notification.interval, Some(60_000));
}
