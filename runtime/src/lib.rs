mod pipeline;
mod service;

pub use pipeline::{Pipeline, PipelineStats, TickOutcome};
pub use service::{
	aggregator_config, evaluator_config, gbm_config, queue_config, Runtime, RuntimeError,
	RuntimeHandle, ShutdownReport,
};

#[cfg(test)]
mod tests {
	use super::{Pipeline, TickOutcome};
	use notify::{DeliveryQueue, QueueConfig};
	use pricewatch::{
		AggregatorConfig, BarKind, ClauseSpec, Combinator, Comparator, NotificationSpec,
		PriceField, RuleSpec, RuleStore, TargetKind, TickError, TickInput,
	};
	use std::sync::Arc;

	const BASE: i64 = 1_700_000_040_000;

	fn close_above(value: f64) -> RuleSpec {
		RuleSpec {
			clauses: vec![ClauseSpec {
				field: PriceField::Close,
				comparator: Comparator::Higher,
				target: TargetKind::FixedValue,
				value: Some(value),
			}],
			combinator: Combinator::And,
			notification: NotificationSpec::default(),
			raw_description: format!("close above {}", value),
		}
	}

	fn pipeline(capacity: usize) -> (Pipeline, Arc<RuleStore>, Arc<DeliveryQueue>) {
		let store = Arc::new(RuleStore::default());
		let queue = Arc::new(DeliveryQueue::new(QueueConfig {
			capacity,
			..QueueConfig::default()
		}));
		let pipeline = Pipeline::new(AggregatorConfig::default(), Arc::clone(&store), Arc::clone(&queue));
		(pipeline, store, queue)
	}

	#[test]
	fn finalized_bars_flow_into_queue() {
		let (mut pipeline, store, queue) = pipeline(16);
		store.register("alice", close_above(100.0)).expect("valid rule");

		let closes = [95.0, 101.0, 99.0, 100.0];
		let mut fired = Vec::new();
		for (minute, close) in closes.iter().enumerate() {
			let outcome = pipeline
				.on_tick(TickInput::new(BASE + minute as i64 * 60_000, *close))
				.expect("valid tick");
			if let Some(event) = outcome.event {
				assert_eq!(event.kind, BarKind::Finalized);
				fired.push(outcome.notifications);
			}
		}

		assert_eq!(fired, vec![0, 1, 0]);
		let pending = queue.pending();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].subscriber_id, "alice");
		assert_eq!(pending[0].bar.close_price, 101.0);
		assert!(pending[0].message.contains("Condition: close above 100"));
	}

	#[test]
	fn intermediate_updates_are_evaluated_too() {
		let (mut pipeline, store, queue) = pipeline(16);
		store.register("bob", close_above(100.0)).expect("valid rule");

		assert_eq!(pipeline.on_tick(TickInput::new(BASE, 99.0)).expect("valid"), TickOutcome::default());
		let outcome = pipeline.on_tick(TickInput::new(BASE + 1_000, 100.5)).expect("valid");
		assert_eq!(outcome.event.map(|x| x.kind), Some(BarKind::Intermediate));
		assert_eq!(outcome.notifications, 1);
		assert_eq!(queue.len(), 1);

		// same second: throttled, no evaluation
		let outcome = pipeline.on_tick(TickInput::new(BASE + 1_500, 101.0)).expect("valid");
		assert_eq!(outcome, TickOutcome::default());
		assert_eq!(pipeline.stats().intermediate_bars, 1);
	}

	#[test]
	fn rejected_ticks_leave_pipeline_untouched() {
		let (mut pipeline, store, queue) = pipeline(16);
		store.register("carol", close_above(1.0)).expect("valid rule");

		pipeline.on_tick(TickInput::new(BASE + 120_000, 50.0)).expect("valid");
		assert!(matches!(
			pipeline.on_tick(TickInput::new(BASE, 50.0)),
			Err(TickError::StaleTimestamp { .. })
		));
		assert!(matches!(
			pipeline.on_tick(TickInput::new(BASE + 120_001, f64::NAN)),
			Err(TickError::NonFinitePrice(_))
		));
		assert_eq!(pipeline.stats().rejected, 2);
		assert!(queue.is_empty());
		assert_eq!(pipeline.aggregator().current().map(|x| x.close_price), Some(50.0));
	}

	#[test]
	fn flush_evaluates_open_bar_and_reports_drops() {
		let (mut pipeline, store, queue) = pipeline(1);
		store.register("dave", close_above(10.0)).expect("valid rule");
		store.register("erin", close_above(10.0)).expect("valid rule");

		pipeline.on_tick(TickInput::new(BASE, 20.0)).expect("valid");
		let outcome = pipeline.flush();
		assert_eq!(outcome.notifications, 2);
		assert_eq!(outcome.dropped, 1);
		assert_eq!(queue.len(), 1);
		assert_eq!(pipeline.flush(), TickOutcome::default());
		assert_eq!(pipeline.evaluator().previous_bar().map(|x| x.close_price), Some(20.0));
	}
}
