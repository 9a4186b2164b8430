//! 投递队列模块。
//!
//! 有界缓冲 + 过载策略：满载时默认丢弃最旧的请求以接纳最新请求，
//! 入队永不阻塞生产者。入队与批量取出由同一把锁互斥。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use pricewatch::NotificationRequest;
use tracing::warn;

use crate::QueueMetrics;

/// 队列满载时的处理策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverloadPolicy {
	/// 丢弃当前新入队请求，保留既有队列内容。
	DropNewest,
	/// 丢弃队首最旧请求，再写入当前请求。
	DropOldest,
}

impl Default for OverloadPolicy {
	fn default() -> Self {
		Self::DropOldest
	}
}

/// 单次入队的结果，用于上层统计丢弃行为。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
	/// 成功入队。
	Enqueued,
	/// 新请求被丢弃。
	DroppedNewest,
	/// 为写入新请求而丢弃了一条最旧请求。
	DroppedOldest,
}

/// 投递队列配置。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
	/// 缓冲容量上限。
	pub capacity: usize,
	/// 每次定时批处理最多取出的请求数。
	pub batch_size: usize,
	/// 单条请求最多重试次数（不含首次投递）。
	pub max_retries: u32,
	/// 定时批处理周期（毫秒）。
	pub dispatch_interval_ms: u64,
	/// 满载策略。
	pub overload_policy: OverloadPolicy,
}

impl Default for QueueConfig {
	fn default() -> Self {
		Self {
			capacity: 10_000,
			batch_size: 100,
			max_retries: 3,
			dispatch_interval_ms: 1000,
			overload_policy: OverloadPolicy::default(),
		}
	}
}

/// 有界通知缓冲。
#[derive(Debug)]
pub struct DeliveryQueue {
	buffer: Mutex<VecDeque<NotificationRequest>>,
	config: QueueConfig,
	enqueued: AtomicU64,
	dropped_newest: AtomicU64,
	dropped_oldest: AtomicU64,
	delivered: AtomicU64,
	retried: AtomicU64,
	exhausted: AtomicU64,
}

impl Default for DeliveryQueue {
	fn default() -> Self {
		Self::new(QueueConfig::default())
	}
}

impl DeliveryQueue {
	/// 使用指定配置创建队列，容量与批大小至少为 1。
	pub fn new(mut config: QueueConfig) -> Self {
		config.capacity = config.capacity.max(1);
		config.batch_size = config.batch_size.max(1);
		Self {
			buffer: Mutex::new(VecDeque::with_capacity(config.capacity.min(1024))),
			config,
			enqueued: AtomicU64::new(0),
			dropped_newest: AtomicU64::new(0),
			dropped_oldest: AtomicU64::new(0),
			delivered: AtomicU64::new(0),
			retried: AtomicU64::new(0),
			exhausted: AtomicU64::new(0),
		}
	}

	/// 追加到队尾；满载时按策略丢弃。
	pub fn enqueue(&self, request: NotificationRequest) -> EnqueueResult {
		let result = self.push_back(request);
		if result != EnqueueResult::DroppedNewest {
			self.enqueued.fetch_add(1, Ordering::Relaxed);
		}
		result
	}

	/// 批量入队，返回因满载而丢弃的条数。
	pub fn enqueue_all(&self, requests: impl IntoIterator<Item = NotificationRequest>) -> usize {
		requests
			.into_iter()
			.map(|request| self.enqueue(request))
			.filter(|result| *result != EnqueueResult::Enqueued)
			.count()
	}

	/// 失败请求重新排到队尾，进入后续批次。
	pub(crate) fn requeue(&self, request: NotificationRequest) -> EnqueueResult {
		self.retried.fetch_add(1, Ordering::Relaxed);
		self.push_back(request)
	}

	/// 从队首取出至多 `batch_size` 条请求。
	pub fn take_batch(&self) -> Vec<NotificationRequest> {
		let mut guard = self.buffer.lock().expect("delivery queue lock poisoned");
		let count = guard.len().min(self.config.batch_size);
		guard.drain(..count).collect()
	}

	/// 当前排队内容的拷贝（队首在前）。
	pub fn pending(&self) -> Vec<NotificationRequest> {
		self.buffer
			.lock()
			.expect("delivery queue lock poisoned")
			.iter()
			.cloned()
			.collect()
	}

	/// 当前队列长度。
	pub fn len(&self) -> usize {
		self.buffer.lock().expect("delivery queue lock poisoned").len()
	}

	/// 队列是否为空。
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// 队列容量上限。
	pub fn capacity(&self) -> usize {
		self.config.capacity
	}

	/// 队列配置。
	pub fn config(&self) -> QueueConfig {
		self.config
	}

	/// 返回当前指标快照。
	pub fn metrics(&self) -> QueueMetrics {
		let dropped_newest = self.dropped_newest.load(Ordering::Relaxed);
		let dropped_oldest = self.dropped_oldest.load(Ordering::Relaxed);
		QueueMetrics {
			enqueued: self.enqueued.load(Ordering::Relaxed),
			dropped: dropped_newest + dropped_oldest,
			dropped_newest,
			dropped_oldest,
			delivered: self.delivered.load(Ordering::Relaxed),
			retried: self.retried.load(Ordering::Relaxed),
			exhausted: self.exhausted.load(Ordering::Relaxed),
			len: self.len(),
			capacity: self.config.capacity,
		}
	}

	pub(crate) fn record_delivered(&self) {
		self.delivered.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_exhausted(&self) {
		self.exhausted.fetch_add(1, Ordering::Relaxed);
	}

	fn push_back(&self, request: NotificationRequest) -> EnqueueResult {
		let mut guard = self.buffer.lock().expect("delivery queue lock poisoned");
		if guard.len() < self.config.capacity {
			guard.push_back(request);
			return EnqueueResult::Enqueued;
		}

		match self.config.overload_policy {
			OverloadPolicy::DropNewest => {
				self.dropped_newest.fetch_add(1, Ordering::Relaxed);
				warn!(
					capacity = self.config.capacity,
					subscriber = %request.subscriber_id,
					"delivery queue full, dropping newest notification"
				);
				EnqueueResult::DroppedNewest
			}
			OverloadPolicy::DropOldest => {
				let evicted = guard.pop_front();
				guard.push_back(request);
				self.dropped_oldest.fetch_add(1, Ordering::Relaxed);
				warn!(
					capacity = self.config.capacity,
					evicted = ?evicted.map(|x| x.subscriber_id),
					"delivery queue full, dropping oldest notification"
				);
				EnqueueResult::DroppedOldest
			}
		}
	}
}
