use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadHandle};
use std::time::Duration as StdDuration;

use config::{FeedMode, PricewatchConfig};
use crossbeam::channel::{self, RecvTimeoutError};
use feed::{
	pump_ticks, FeedError, GbmConfig, GbmTickSource, ReconnectPolicy, ResilientSource,
	TickSource, WsTickSource,
};
use notify::{
	DeliveryQueue, DispatchedNotification, Dispatcher, FanoutGateway, GatewayError, QueueConfig,
	QueueMetrics, Session,
};
use pricewatch::{AggregatorConfig, EvaluatorConfig, Rule, RuleError, RuleId, RuleSpec, RuleStore};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::pipeline::{Pipeline, PipelineStats};

const TICK_CHANNEL_CAPACITY: usize = 4096;
const PIPELINE_POLL_MS: u64 = 100;

#[derive(Debug)]
pub enum RuntimeError {
	/// `start` was called outside a tokio runtime.
	NoAsyncRuntime,
	Spawn(std::io::Error),
}

impl std::fmt::Display for RuntimeError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			RuntimeError::NoAsyncRuntime => write!(f, "runtime must start inside a tokio runtime"),
			RuntimeError::Spawn(error) => write!(f, "failed to spawn worker thread: {}", error),
		}
	}
}

impl std::error::Error for RuntimeError {}

/// Totals reported after a clean shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
	pub published_ticks: usize,
	pub pipeline: PipelineStats,
	pub queue: QueueMetrics,
}

pub struct Runtime;

impl Runtime {
	/// Start with the tick source selected by `config.feed.mode`.
	pub fn start(config: PricewatchConfig) -> Result<RuntimeHandle, RuntimeError> {
		match config.feed.mode {
			FeedMode::Gbm => {
				let source = GbmTickSource::new(gbm_config(&config));
				Self::start_with_source(config, source)
			}
			FeedMode::Ws => {
				let source = WsTickSource::new(config.feed.url.clone());
				Self::start_with_source(config, source)
			}
		}
	}

	/// Start with a caller supplied tick source.
	pub fn start_with_source<S>(config: PricewatchConfig, source: S) -> Result<RuntimeHandle, RuntimeError>
	where
		S: TickSource + Send + 'static,
	{
		let async_handle = tokio::runtime::Handle::try_current().map_err(|_| RuntimeError::NoAsyncRuntime)?;

		let store = Arc::new(RuleStore::new(evaluator_config(&config)));
		let queue = Arc::new(DeliveryQueue::new(queue_config(&config)));
		let gateway = Arc::new(FanoutGateway::new(config.gateway.channel_capacity));
		let dispatcher = Dispatcher::new(
			Arc::clone(&queue),
			gateway.clone(),
			config.gateway.monitor_capacity,
		);
		let monitor = dispatcher.monitor_sender();

		let stop = Arc::new(AtomicBool::new(false));
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let (tick_tx, tick_rx) = channel::bounded(TICK_CHANNEL_CAPACITY);

		let venue = source.venue().to_string();
		let feed_stop = Arc::clone(&stop);
		let policy = ReconnectPolicy {
			delay_ms: config.feed.reconnect_delay_ms,
			max_retries: None,
		};
		let feed_thread = thread::Builder::new()
			.name("pricewatch-feed".to_string())
			.spawn(move || {
				let mut source = ResilientSource::new(source, policy).with_shutdown(Arc::clone(&feed_stop));
				pump_ticks(&mut source, &tick_tx, &feed_stop)
			})
			.map_err(RuntimeError::Spawn)?;

		let mut pipeline = Pipeline::new(aggregator_config(&config), Arc::clone(&store), Arc::clone(&queue));
		let pipeline_stop = Arc::clone(&stop);
		let pipeline_thread = thread::Builder::new()
			.name("pricewatch-pipeline".to_string())
			.spawn(move || {
				loop {
					match tick_rx.recv_timeout(StdDuration::from_millis(PIPELINE_POLL_MS)) {
						Ok(tick) => {
							let _ = pipeline.on_tick(tick);
						}
						Err(RecvTimeoutError::Timeout) => {
							if pipeline_stop.load(Ordering::Acquire) {
								break;
							}
						}
						Err(RecvTimeoutError::Disconnected) => break,
					}
				}
				pipeline.flush();
				pipeline.stats()
			})
			.map_err(RuntimeError::Spawn)?;

		let dispatcher_task = {
			let _guard = async_handle.enter();
			dispatcher.spawn(shutdown_rx)
		};

		info!(
			venue = %venue,
			symbol = %config.feed.symbol,
			bucket_ms = config.aggregator.bucket_ms,
			queue_capacity = config.queue.capacity,
			"pricewatch runtime started"
		);

		Ok(RuntimeHandle {
			store,
			gateway,
			queue,
			monitor,
			stop,
			shutdown_tx,
			feed_thread: Some(feed_thread),
			pipeline_thread: Some(pipeline_thread),
			dispatcher_task: Some(dispatcher_task),
		})
	}
}

/// Control surface of a running pipeline.
pub struct RuntimeHandle {
	store: Arc<RuleStore>,
	gateway: Arc<FanoutGateway>,
	queue: Arc<DeliveryQueue>,
	monitor: broadcast::Sender<DispatchedNotification>,
	stop: Arc<AtomicBool>,
	shutdown_tx: watch::Sender<bool>,
	feed_thread: Option<ThreadHandle<Result<usize, FeedError>>>,
	pipeline_thread: Option<ThreadHandle<PipelineStats>>,
	dispatcher_task: Option<JoinHandle<()>>,
}

impl RuntimeHandle {
	pub fn register_rule(&self, subscriber_id: &str, spec: RuleSpec) -> Result<Rule, RuleError> {
		self.store.register(subscriber_id, spec)
	}

	pub fn rule(&self, id: RuleId) -> Result<Rule, RuleError> {
		self.store.get(id).ok_or(RuleError::UnknownRule(id))
	}

	pub fn rules_for(&self, subscriber_id: &str) -> Vec<Rule> {
		self.store.by_subscriber(subscriber_id)
	}

	pub fn connect(&self, subscriber_id: Option<&str>) -> Result<Session, GatewayError> {
		self.gateway.connect(subscriber_id)
	}

	pub fn disconnect(&self, session: &Session) -> bool {
		self.gateway.disconnect(session)
	}

	/// Read-only stream of every successfully delivered notification.
	pub fn monitor(&self) -> broadcast::Receiver<DispatchedNotification> {
		self.monitor.subscribe()
	}

	pub fn queue_metrics(&self) -> QueueMetrics {
		self.queue.metrics()
	}

	pub fn store(&self) -> &Arc<RuleStore> {
		&self.store
	}

	pub fn gateway(&self) -> &Arc<FanoutGateway> {
		&self.gateway
	}

	/// Stop the feed, drain the pipeline, then stop the dispatcher.
	pub async fn shutdown(mut self) -> ShutdownReport {
		self.stop.store(true, Ordering::Release);

		let feed_thread = self.feed_thread.take();
		let pipeline_thread = self.pipeline_thread.take();
		let joined = tokio::task::spawn_blocking(move || {
			let published = match feed_thread.map(|x| x.join()) {
				Some(Ok(Ok(count))) => count,
				Some(Ok(Err(error))) => {
					warn!(%error, "tick feed ended with error");
					0
				}
				Some(Err(_)) => {
					error!("tick feed thread panicked");
					0
				}
				None => 0,
			};
			let pipeline = match pipeline_thread.map(|x| x.join()) {
				Some(Ok(stats)) => stats,
				Some(Err(_)) => {
					error!("pipeline thread panicked");
					PipelineStats::default()
				}
				None => PipelineStats::default(),
			};
			(published, pipeline)
		})
		.await;
		let (published_ticks, pipeline) = joined.unwrap_or_default();

		let _ = self.shutdown_tx.send(true);
		if let Some(task) = self.dispatcher_task.take() {
			if task.await.is_err() {
				error!("dispatcher task failed");
			}
		}

		let queue = self.queue.metrics();
		info!(
			published_ticks,
			finalized_bars = pipeline.finalized_bars,
			notifications = pipeline.notifications,
			pending = queue.len,
			"pricewatch runtime stopped"
		);
		ShutdownReport {
			published_ticks,
			pipeline,
			queue,
		}
	}
}

impl Drop for RuntimeHandle {
	fn drop(&mut self) {
		self.stop.store(true, Ordering::Release);
		let _ = self.shutdown_tx.send(true);
	}
}

pub fn aggregator_config(config: &PricewatchConfig) -> AggregatorConfig {
	AggregatorConfig {
		symbol: config.feed.symbol.clone(),
		bucket_ms: config.aggregator.bucket_ms,
		history_capacity: config.aggregator.history_capacity,
		max_lag_ms: config.aggregator.max_lag_ms,
		intermediate_throttle_ms: config.aggregator.intermediate_throttle_ms,
	}
}

pub fn evaluator_config(config: &PricewatchConfig) -> EvaluatorConfig {
	EvaluatorConfig {
		default_interval_ms: config.evaluator.default_interval_ms,
		..EvaluatorConfig::with_offset_minutes(config.evaluator.utc_offset_minutes)
	}
}

pub fn queue_config(config: &PricewatchConfig) -> QueueConfig {
	QueueConfig {
		capacity: config.queue.capacity,
		batch_size: config.queue.batch_size,
		max_retries: config.queue.max_retries,
		dispatch_interval_ms: config.queue.dispatch_interval_ms,
		..QueueConfig::default()
	}
}

pub fn gbm_config(config: &PricewatchConfig) -> GbmConfig {
	GbmConfig {
		initial_price: config.feed.initial_price,
		drift: config.feed.drift,
		volatility: config.feed.volatility,
		count_per_batch: config.feed.count_per_batch,
		batch_interval_ms: config.feed.batch_interval_ms,
	}
}
