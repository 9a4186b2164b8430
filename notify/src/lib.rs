//! `notify` crate 入口。
//!
//! 职责：通知请求的有界缓冲、定时批量投递与重试、按订阅者扇出推送以及运维监控流。
//! 该文件只做模块装配与统一导出，具体实现位于各子模块。
//!
//! 模块分工：
//! - `queue`：有界投递队列与满载策略。
//! - `dispatcher`：定时批处理、重试与监控广播。
//! - `gateway`：订阅者通道注册与扇出推送。
//! - `metrics`：运行指标快照。
//!
//! 快速示例：
//! ```rust
//! use std::sync::Arc;
//! use notify::{DeliveryQueue, Dispatcher, FanoutGateway, QueueConfig};
//!
//! let queue = Arc::new(DeliveryQueue::new(QueueConfig::default()));
//! let gateway = Arc::new(FanoutGateway::new(64));
//! let session = gateway.connect(Some("alice")).expect("subscriber id present");
//! let dispatcher = Dispatcher::new(Arc::clone(&queue), gateway.clone(), 128);
//! let _monitor = dispatcher.monitor();
//! assert_eq!(gateway.channel_count(&session.subscriber_id), 1);
//! ```

mod dispatcher;
mod gateway;
mod metrics;
mod queue;

pub use dispatcher::{
	DeliveryError, DeliverySink, DispatchReport, DispatchedNotification, Dispatcher,
};
pub use gateway::{
	FanoutGateway, GatewayError, NotificationEvent, PushOutcome, Session, SessionChannel,
	SubscriberChannel,
};
pub use metrics::QueueMetrics;
pub use queue::{DeliveryQueue, EnqueueResult, OverloadPolicy, QueueConfig};
