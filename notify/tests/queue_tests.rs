use std::sync::Arc;
use std::time::Duration;

use notify::{
	DeliveryQueue, Dispatcher, EnqueueResult, FanoutGateway, OverloadPolicy, QueueConfig,
};
use pricewatch::{Bar, NotificationRequest};
use proptest::prelude::*;
use tokio::sync::watch;

fn bar(close: f64) -> Bar {
	Bar {
		symbol: "BTC/USD".to_string(),
		timestamp: 1_700_000_040_000,
		open_price: close,
		high_price: close,
		low_price: close,
		close_price: close,
	}
}

fn request(subscriber: &str, index: usize) -> NotificationRequest {
	NotificationRequest::new(subscriber, 7, format!("alert #{}", index), bar(index as f64 + 1.0))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_dispatcher_drains_queue_into_sessions() {
	let queue = Arc::new(DeliveryQueue::new(QueueConfig {
		batch_size: 2,
		dispatch_interval_ms: 10,
		..QueueConfig::default()
	}));
	let gateway = Arc::new(FanoutGateway::new(32));
	let mut session = gateway.connect(Some("erin")).expect("subscriber id present");
	let dispatcher = Dispatcher::new(Arc::clone(&queue), gateway.clone(), 32);
	let mut monitor = dispatcher.monitor();

	for index in 0..5 {
		assert_eq!(queue.enqueue(request("erin", index)), EnqueueResult::Enqueued);
	}

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let handle = dispatcher.spawn(shutdown_rx);

	let mut received = Vec::new();
	for _ in 0..5 {
		let event = tokio::time::timeout(Duration::from_secs(2), session.recv())
			.await
			.expect("event arrives in time")
			.expect("session open");
		received.push(event.message);
	}
	let expected = (0..5).map(|i| format!("alert #{}", i)).collect::<Vec<_>>();
	assert_eq!(received, expected);

	let first = monitor.recv().await.expect("monitor event");
	assert_eq!(first.subscriber_id, "erin");
	assert_eq!(first.message, "alert #0");

	shutdown_tx.send(true).expect("dispatcher alive");
	tokio::time::timeout(Duration::from_secs(2), handle)
		.await
		.expect("dispatcher stops")
		.expect("dispatcher task ok");

	let metrics = queue.metrics();
	assert_eq!(metrics.delivered, 5);
	assert_eq!(metrics.len, 0);
}

#[test]
fn overflow_evicts_exactly_one_per_enqueue() {
	let queue = DeliveryQueue::new(QueueConfig {
		capacity: 3,
		..QueueConfig::default()
	});
	for index in 0..3 {
		queue.enqueue(request("u", index));
	}
	for index in 3..6 {
		assert_eq!(queue.enqueue(request("u", index)), EnqueueResult::DroppedOldest);
		assert_eq!(queue.len(), 3);
	}

	let pending = queue.pending().into_iter().map(|x| x.message).collect::<Vec<_>>();
	assert_eq!(pending, vec!["alert #3", "alert #4", "alert #5"]);
	let metrics = queue.metrics();
	assert_eq!(metrics.dropped, 3);
	assert_eq!(metrics.enqueued, 6);
}

proptest! {
	#[test]
	fn queue_never_exceeds_capacity(
		capacity in 1usize..32,
		ops in prop::collection::vec(any::<bool>(), 1..300),
		drop_newest in any::<bool>(),
	) {
		let queue = DeliveryQueue::new(QueueConfig {
			capacity,
			batch_size: 5,
			overload_policy: if drop_newest { OverloadPolicy::DropNewest } else { OverloadPolicy::DropOldest },
			..QueueConfig::default()
		});

		let mut next = 0usize;
		let mut taken = Vec::new();
		for enqueue in ops {
			if enqueue {
				let before = queue.len();
				let result = queue.enqueue(request("p", next));
				next += 1;
				match result {
					EnqueueResult::Enqueued => prop_assert_eq!(queue.len(), before + 1),
					_ => prop_assert_eq!(queue.len(), capacity),
				}
			} else {
				taken.extend(queue.take_batch().into_iter().map(|x| x.message));
			}
			prop_assert!(queue.len() <= capacity);
		}

		// the buffer keeps FIFO order of what survived
		let mut indices = taken
			.iter()
			.chain(queue.pending().iter().map(|x| &x.message))
			.map(|m| m.trim_start_matches("alert #").parse::<usize>().expect("numbered"))
			.collect::<Vec<_>>();
		let sorted = {
			let mut copy = indices.clone();
			copy.sort_unstable();
			copy
		};
		prop_assert_eq!(&indices, &sorted);
		indices.dedup();
		prop_assert_eq!(indices.len(), sorted.len());
	}
}
