//! 定时批量投递模块。
//!
//! 按固定周期从队首取出一批请求并发投递；失败请求计数后排回队尾，
//! 超过重试上限后丢弃并记录错误。成功投递同时广播到运维监控流。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use pricewatch::NotificationRequest;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gateway::GatewayError;
use crate::DeliveryQueue;

/// 投递失败原因。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
	/// 网关推送失败。
	Gateway(GatewayError),
	/// 其它下游不可用。
	Unavailable(String),
}

impl std::fmt::Display for DeliveryError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DeliveryError::Gateway(error) => write!(f, "gateway error: {}", error),
			DeliveryError::Unavailable(msg) => write!(f, "sink unavailable: {}", msg),
		}
	}
}

impl std::error::Error for DeliveryError {}

/// 投递目标抽象（通常为 `FanoutGateway`）。
#[async_trait]
pub trait DeliverySink: Send + Sync {
	async fn deliver(&self, request: &NotificationRequest) -> Result<(), DeliveryError>;
}

/// 运维监控流中的一条已投递通知。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedNotification {
	pub subscriber_id: String,
	pub message: String,
	pub dispatched_at: i64,
}

/// 单批次处理结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
	/// 本批尝试投递数。
	pub attempted: usize,
	/// 投递成功数。
	pub delivered: usize,
	/// 失败后重新排队数。
	pub requeued: usize,
	/// 超过重试上限被丢弃数。
	pub exhausted: usize,
}

/// 批量投递器。
pub struct Dispatcher {
	queue: Arc<DeliveryQueue>,
	sink: Arc<dyn DeliverySink>,
	monitor: broadcast::Sender<DispatchedNotification>,
}

impl Dispatcher {
	/// 创建投递器，`monitor_capacity` 为监控广播缓冲容量。
	pub fn new(queue: Arc<DeliveryQueue>, sink: Arc<dyn DeliverySink>, monitor_capacity: usize) -> Self {
		let (monitor, _) = broadcast::channel(monitor_capacity.max(1));
		Self {
			queue,
			sink,
			monitor,
		}
	}

	/// 订阅运维监控流（只读）。
	pub fn monitor(&self) -> broadcast::Receiver<DispatchedNotification> {
		self.monitor.subscribe()
	}

	/// 监控流发送端，用于在投递器启动前后创建新的订阅。
	pub fn monitor_sender(&self) -> broadcast::Sender<DispatchedNotification> {
		self.monitor.clone()
	}

	/// 处理一个批次。各请求独立投递，互不影响。
	pub async fn dispatch_once(&self) -> DispatchReport {
		let batch = self.queue.take_batch();
		if batch.is_empty() {
			return DispatchReport::default();
		}

		let mut report = DispatchReport {
			attempted: batch.len(),
			..DispatchReport::default()
		};
		debug!(batch = batch.len(), "dispatching notification batch");

		let outcomes = join_all(batch.into_iter().map(|request| {
			let sink = Arc::clone(&self.sink);
			async move {
				let outcome = sink.deliver(&request).await;
				(request, outcome)
			}
		}))
		.await;

		let max_retries = self.queue.config().max_retries;
		for (mut request, outcome) in outcomes {
			match outcome {
				Ok(()) => {
					report.delivered += 1;
					self.queue.record_delivered();
					let _ = self.monitor.send(DispatchedNotification {
						subscriber_id: request.subscriber_id.clone(),
						message: request.message.clone(),
						dispatched_at: Utc::now().timestamp_millis(),
					});
				}
				Err(error) if request.retry_count < max_retries => {
					request.retry_count += 1;
					warn!(
						subscriber = %request.subscriber_id,
						retry = request.retry_count,
						max_retries,
						%error,
						"delivery failed, requeueing"
					);
					self.queue.requeue(request);
					report.requeued += 1;
				}
				Err(error) => {
					error!(
						subscriber = %request.subscriber_id,
						rule_id = request.rule_id,
						max_retries,
						%error,
						"delivery failed after all retries, dropping"
					);
					self.queue.record_exhausted();
					report.exhausted += 1;
				}
			}
		}

		debug!(
			delivered = report.delivered,
			requeued = report.requeued,
			exhausted = report.exhausted,
			"batch processing completed"
		);
		report
	}

	/// 在 tokio 运行时上启动定时批处理，`shutdown` 置为 true 后退出。
	pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
		let period = Duration::from_millis(self.queue.config().dispatch_interval_ms.max(1));
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			info!(period_ms = period.as_millis() as u64, "notification dispatcher started");
			loop {
				tokio::select! {
					_ = ticker.tick() => {
						let _ = self.dispatch_once().await;
					}
					changed = shutdown.changed() => {
						if changed.is_err() || *shutdown.borrow() {
							break;
						}
					}
				}
			}
			info!("notification dispatcher stopped");
		})
	}
}
