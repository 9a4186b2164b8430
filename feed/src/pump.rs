use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use crossbeam::channel::Sender;
use pricewatch::TickInput;
use tracing::{debug, info};

use crate::error::FeedError;
use crate::protocol::TickSource;

const IDLE_SLEEP_MS: u64 = 5;

/// Forward ticks into `sink` until `shutdown` is raised or the receiver goes away.
pub fn pump_ticks(
    source: &mut impl TickSource,
    sink: &Sender<TickInput>,
    shutdown: &AtomicBool,
) -> Result<usize, FeedError> {
    let mut published = 0usize;
    while !shutdown.load(Ordering::Acquire) {
        match source.poll_tick()? {
            Some(tick) => {
                if sink.send(tick).is_err() {
                    debug!(venue = source.venue(), "tick receiver dropped");
                    break;
                }
                published += 1;
            }
            None => std::thread::sleep(StdDuration::from_millis(IDLE_SLEEP_MS)),
        }
    }
    info!(venue = source.venue(), published, "tick pump stopped");
    Ok(published)
}

/// Forward at most `count` ticks, giving up after a bounded number of empty polls.
pub fn pump_count(
    source: &mut impl TickSource,
    sink: &Sender<TickInput>,
    count: usize,
) -> Result<usize, FeedError> {
    let mut published = 0usize;
    let mut attempts = 0usize;
    let max_attempts = count.saturating_mul(100).max(1);

    while published < count && attempts < max_attempts {
        attempts += 1;
        if let Some(tick) = source.poll_tick()? {
            if sink.send(tick).is_err() {
                break;
            }
            published += 1;
        } else {
            std::thread::sleep(StdDuration::from_millis(IDLE_SLEEP_MS));
        }
    }
    Ok(published)
}
