//! 指标快照模块。
//!
//! 提供投递队列关键运行指标的只读快照结构。

/// 投递队列运行指标快照。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueMetrics {
	/// 已接纳入队的请求数量（不含重试）。
	pub enqueued: u64,
	/// 丢弃总量（`dropped_newest + dropped_oldest`）。
	pub dropped: u64,
	/// 新请求被丢弃数量。
	pub dropped_newest: u64,
	/// 旧请求被挤出数量。
	pub dropped_oldest: u64,
	/// 投递成功数量。
	pub delivered: u64,
	/// 失败后重新排队数量。
	pub retried: u64,
	/// 超过重试上限被丢弃数量。
	pub exhausted: u64,
	/// 队列当前长度。
	pub len: usize,
	/// 队列容量上限。
	pub capacity: usize,
}
