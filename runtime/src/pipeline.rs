use std::sync::Arc;

use notify::DeliveryQueue;
use pricewatch::{
	AggregatorConfig, BarEvent, RuleEvaluator, RuleStore, TickBarAggregator, TickError, TickInput,
};
use tracing::{debug, warn};

/// What one tick did to the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
	pub event: Option<BarEvent>,
	/// Notification requests created by the evaluator.
	pub notifications: usize,
	/// Requests that displaced (or were refused by) a full queue.
	pub dropped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
	pub ticks: u64,
	pub rejected: u64,
	pub intermediate_bars: u64,
	pub finalized_bars: u64,
	pub notifications: u64,
}

/// Aggregation, evaluation and enqueue, run strictly in tick order on one thread.
pub struct Pipeline {
	aggregator: TickBarAggregator,
	evaluator: RuleEvaluator,
	queue: Arc<DeliveryQueue>,
	stats: PipelineStats,
}

impl Pipeline {
	pub fn new(config: AggregatorConfig, store: Arc<RuleStore>, queue: Arc<DeliveryQueue>) -> Self {
		Self {
			aggregator: TickBarAggregator::with_config(config),
			evaluator: RuleEvaluator::new(store),
			queue,
			stats: PipelineStats::default(),
		}
	}

	pub fn on_tick(&mut self, tick: TickInput) -> Result<TickOutcome, TickError> {
		self.stats.ticks += 1;
		let event = match self.aggregator.update(tick) {
			Ok(event) => event,
			Err(error) => {
				self.stats.rejected += 1;
				warn!(timestamp = tick.timestamp, price = tick.price, %error, "tick rejected");
				return Err(error);
			}
		};

		Ok(match event {
			Some(event) => self.evaluate(event),
			None => TickOutcome::default(),
		})
	}

	/// Finalize the open bar and evaluate it, e.g. on shutdown.
	pub fn flush(&mut self) -> TickOutcome {
		match self.aggregator.flush() {
			Some(event) => self.evaluate(event),
			None => TickOutcome::default(),
		}
	}

	pub fn stats(&self) -> PipelineStats {
		self.stats
	}

	pub fn aggregator(&self) -> &TickBarAggregator {
		&self.aggregator
	}

	pub fn evaluator(&self) -> &RuleEvaluator {
		&self.evaluator
	}

	fn evaluate(&mut self, event: BarEvent) -> TickOutcome {
		if event.is_finalized() {
			self.stats.finalized_bars += 1;
		} else {
			self.stats.intermediate_bars += 1;
		}

		let requests = self.evaluator.on_bar(&event.bar);
		let notifications = requests.len();
		self.stats.notifications += notifications as u64;
		let dropped = self.queue.enqueue_all(requests);
		if notifications > 0 {
			debug!(
				timestamp = event.bar.timestamp,
				kind = ?event.kind,
				notifications,
				dropped,
				"bar evaluated"
			);
		}

		TickOutcome {
			event: Some(event),
			notifications,
			dropped,
		}
	}
}
