//! 扇出网关模块（fan-out）。
//!
//! 维护 订阅者 -> 在线通道集合 的映射，按订阅者 key 分片以隔离锁竞争；
//! 一条通知推送到该订阅者的全部通道，单个通道写失败不影响其余通道。

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use pricewatch::{Bar, NotificationRequest};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatcher::{DeliveryError, DeliverySink};

/// 推送给订阅端的事件：`{message, data: {symbol, timestamp, open, high, low, close}}`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
	pub message: String,
	pub data: Bar,
}

impl NotificationEvent {
	/// 序列化为推送线路格式。
	pub fn to_json(&self) -> serde_json::Result<String> {
		serde_json::to_string(self)
	}
}

/// 网关错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
	/// 连接未携带可识别的订阅者身份。
	MissingSubscriber,
	/// 通道已关闭。
	ChannelClosed(u64),
	/// 通道缓冲已满。
	ChannelFull(u64),
	/// 该订阅者的全部通道均写入失败。
	AllChannelsFailed { subscriber: String, failed: usize },
}

impl std::fmt::Display for GatewayError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			GatewayError::MissingSubscriber => write!(f, "connection without subscriber id"),
			GatewayError::ChannelClosed(id) => write!(f, "channel {} closed", id),
			GatewayError::ChannelFull(id) => write!(f, "channel {} full", id),
			GatewayError::AllChannelsFailed { subscriber, failed } => {
				write!(f, "all {} channels of {} failed", failed, subscriber)
			}
		}
	}
}

impl std::error::Error for GatewayError {}

/// 一个在线投递通道（例如一个会话连接）。
pub trait SubscriberChannel: Send + Sync {
	/// 网关内唯一的通道 id。
	fn id(&self) -> u64;
	/// 写入一条事件，不得阻塞。
	fn send(&self, event: &NotificationEvent) -> Result<(), GatewayError>;
	/// 拒绝或断开时关闭通道。
	fn close(&self) {}
}

/// 基于 tokio mpsc 的进程内会话通道。
#[derive(Debug)]
pub struct SessionChannel {
	id: u64,
	sender: mpsc::Sender<NotificationEvent>,
	closed: AtomicBool,
}

impl SessionChannel {
	/// 创建通道及其接收端。
	pub fn new(id: u64, capacity: usize) -> (Self, mpsc::Receiver<NotificationEvent>) {
		let (sender, receiver) = mpsc::channel(capacity.max(1));
		(
			Self {
				id,
				sender,
				closed: AtomicBool::new(false),
			},
			receiver,
		)
	}
}

impl SubscriberChannel for SessionChannel {
	fn id(&self) -> u64 {
		self.id
	}

	fn send(&self, event: &NotificationEvent) -> Result<(), GatewayError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(GatewayError::ChannelClosed(self.id));
		}
		self.sender.try_send(event.clone()).map_err(|error| match error {
			mpsc::error::TrySendError::Full(_) => GatewayError::ChannelFull(self.id),
			mpsc::error::TrySendError::Closed(_) => GatewayError::ChannelClosed(self.id),
		})
	}

	fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}
}

/// `connect` 返回的会话句柄，持有通道接收端。
#[derive(Debug)]
pub struct Session {
	pub subscriber_id: String,
	pub channel_id: u64,
	receiver: mpsc::Receiver<NotificationEvent>,
}

impl Session {
	/// 等待下一条事件；网关侧通道被移除且缓冲耗尽后返回 `None`。
	pub async fn recv(&mut self) -> Option<NotificationEvent> {
		self.receiver.recv().await
	}

	/// 非阻塞读取一条事件。
	pub fn try_recv(&mut self) -> Option<NotificationEvent> {
		self.receiver.try_recv().ok()
	}
}

/// 单次推送结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOutcome {
	/// 写入成功的通道数。
	pub delivered: usize,
	/// 写入失败的通道数。
	pub failed: usize,
}

type ChannelMap = HashMap<String, Vec<Arc<dyn SubscriberChannel>>>;

/// 订阅者扇出网关。
pub struct FanoutGateway {
	shards: Vec<RwLock<ChannelMap>>,
	shard_count: usize,
	channel_capacity: usize,
	next_channel_id: AtomicU64,
}

impl FanoutGateway {
	/// 创建网关，`channel_capacity` 为 `connect` 创建的会话缓冲容量。
	pub fn new(channel_capacity: usize) -> Self {
		let shard_count = default_gateway_shards();
		let mut shards = Vec::with_capacity(shard_count);
		for _ in 0..shard_count {
			shards.push(RwLock::new(HashMap::new()));
		}

		Self {
			shards,
			shard_count,
			channel_capacity: channel_capacity.max(1),
			next_channel_id: AtomicU64::new(1),
		}
	}

	/// 注册一个通道；没有订阅者身份时关闭通道并拒绝。
	pub fn register(
		&self,
		subscriber_id: Option<&str>,
		channel: Arc<dyn SubscriberChannel>,
	) -> Result<(), GatewayError> {
		let Some(subscriber_id) = subscriber_id.map(str::trim).filter(|x| !x.is_empty()) else {
			warn!(channel = channel.id(), "refusing connection without subscriber id");
			channel.close();
			return Err(GatewayError::MissingSubscriber);
		};

		let mut guard = self.shards[self.shard_index(subscriber_id)]
			.write()
			.expect("gateway shard lock poisoned");
		info!(subscriber = %subscriber_id, channel = channel.id(), "channel connected");
		guard
			.entry(subscriber_id.to_string())
			.or_default()
			.push(channel);
		Ok(())
	}

	/// 移除通道；集合为空时一并移除订阅者条目。返回是否找到该通道。
	pub fn unregister(&self, subscriber_id: &str, channel_id: u64) -> bool {
		let mut guard = self.shards[self.shard_index(subscriber_id)]
			.write()
			.expect("gateway shard lock poisoned");
		let Some(channels) = guard.get_mut(subscriber_id) else {
			return false;
		};

		let before = channels.len();
		channels.retain(|channel| channel.id() != channel_id);
		let removed = channels.len() != before;
		if channels.is_empty() {
			guard.remove(subscriber_id);
		}
		if removed {
			info!(subscriber = %subscriber_id, channel = channel_id, "channel disconnected");
		}
		removed
	}

	/// 创建进程内会话通道并注册。
	pub fn connect(&self, subscriber_id: Option<&str>) -> Result<Session, GatewayError> {
		let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
		let (channel, receiver) = SessionChannel::new(id, self.channel_capacity);
		self.register(subscriber_id, Arc::new(channel))?;
		Ok(Session {
			subscriber_id: subscriber_id.map(|x| x.trim().to_string()).unwrap_or_default(),
			channel_id: id,
			receiver,
		})
	}

	/// 断开会话。
	pub fn disconnect(&self, session: &Session) -> bool {
		self.unregister(&session.subscriber_id, session.channel_id)
	}

	/// 推送到订阅者的全部通道。
	///
	/// 没有在线通道视为成功（投递 0 个）。已关闭的通道在此移除，不计入失败；
	/// 仅当其余通道全部写入失败时返回错误。
	pub fn push(&self, subscriber_id: &str, message: &str, data: &Bar) -> Result<PushOutcome, GatewayError> {
		let channels = {
			let guard = self.shards[self.shard_index(subscriber_id)]
				.read()
				.expect("gateway shard lock poisoned");
			guard.get(subscriber_id).cloned().unwrap_or_default()
		};

		if channels.is_empty() {
			debug!(subscriber = %subscriber_id, "no connected channels");
			return Ok(PushOutcome::default());
		}

		let event = NotificationEvent {
			message: message.to_string(),
			data: data.clone(),
		};
		let mut outcome = PushOutcome::default();
		let mut closed = Vec::new();
		for channel in &channels {
			match channel.send(&event) {
				Ok(()) => outcome.delivered += 1,
				Err(GatewayError::ChannelClosed(id)) => closed.push(id),
				Err(error) => {
					outcome.failed += 1;
					warn!(subscriber = %subscriber_id, channel = channel.id(), %error, "channel write failed");
				}
			}
		}

		for id in closed {
			debug!(subscriber = %subscriber_id, channel = id, "pruning closed channel");
			self.unregister(subscriber_id, id);
		}

		if outcome.delivered == 0 && outcome.failed == 0 {
			debug!(subscriber = %subscriber_id, "only closed channels, treated as offline");
			return Ok(outcome);
		}
		if outcome.delivered == 0 {
			return Err(GatewayError::AllChannelsFailed {
				subscriber: subscriber_id.to_string(),
				failed: outcome.failed,
			});
		}
		debug!(subscriber = %subscriber_id, delivered = outcome.delivered, "notification pushed");
		Ok(outcome)
	}

	/// 在线订阅者数量。
	pub fn subscriber_count(&self) -> usize {
		self.shards
			.iter()
			.map(|shard| shard.read().expect("gateway shard lock poisoned").len())
			.sum()
	}

	/// 指定订阅者的在线通道数量。
	pub fn channel_count(&self, subscriber_id: &str) -> usize {
		self.shards[self.shard_index(subscriber_id)]
			.read()
			.expect("gateway shard lock poisoned")
			.get(subscriber_id)
			.map(Vec::len)
			.unwrap_or(0)
	}

	fn shard_index(&self, key: &str) -> usize {
		hash_key(key) % self.shard_count
	}
}

#[async_trait]
impl DeliverySink for FanoutGateway {
	async fn deliver(&self, request: &NotificationRequest) -> Result<(), DeliveryError> {
		self.push(&request.subscriber_id, &request.message, &request.bar)
			.map(|_| ())
			.map_err(DeliveryError::Gateway)
	}
}

fn hash_key(text: &str) -> usize {
	let mut hasher = std::collections::hash_map::DefaultHasher::new();
	text.hash(&mut hasher);
	hasher.finish() as usize
}

fn default_gateway_shards() -> usize {
	let cpu = std::thread::available_parallelism()
		.map(|x| x.get())
		.unwrap_or(8);
	(cpu.saturating_mul(2)).clamp(8, 128)
}
