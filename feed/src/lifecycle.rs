use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use pricewatch::TickInput;
use tracing::{info, warn};

use crate::error::FeedError;
use crate::protocol::TickSource;

const SLEEP_SLICE_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed pause between two connection attempts.
    pub delay_ms: u64,
    /// `None` keeps retrying forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 5000,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLifecycleStats {
    pub reconnect_total: u64,
    pub connect_failures: u64,
    pub stream_failures: u64,
}

/// Wraps a source and transparently reconnects it after failures.
pub struct ResilientSource<S: TickSource> {
    source: S,
    policy: ReconnectPolicy,
    connected: bool,
    shutdown: Option<Arc<AtomicBool>>,
    stats: SourceLifecycleStats,
}

impl<S: TickSource> ResilientSource<S> {
    pub fn new(source: S, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            connected: false,
            shutdown: None,
            stats: SourceLifecycleStats::default(),
        }
    }

    /// Abort reconnect waits once `flag` is raised.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    pub fn stats(&self) -> SourceLifecycleStats {
        self.stats.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn inner(&self) -> &S {
        &self.source
    }

    fn stopping(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn reconnect(&mut self) -> Result<(), FeedError> {
        let mut attempt = 0u32;
        loop {
            if self.stopping() {
                return Err(FeedError::Closed);
            }

            match self.source.connect() {
                Ok(()) => {
                    self.connected = true;
                    self.stats.reconnect_total += 1;
                    info!(venue = self.source.venue(), attempt, "tick source connected");
                    return Ok(());
                }
                Err(error) => {
                    self.stats.connect_failures += 1;
                    attempt += 1;
                    warn!(
                        venue = self.source.venue(),
                        attempt,
                        delay_ms = self.policy.delay_ms,
                        %error,
                        "tick source connect failed"
                    );
                    if self.policy.max_retries.is_some_and(|max| attempt > max) {
                        return Err(FeedError::ConnectionFailed(
                            "reconnect retries exhausted".to_string(),
                        ));
                    }
                }
            }

            self.pause();
        }
    }

    fn pause(&self) {
        let deadline = Instant::now() + StdDuration::from_millis(self.policy.delay_ms);
        while Instant::now() < deadline {
            if self.stopping() {
                return;
            }
            let left = deadline.saturating_duration_since(Instant::now());
            thread::sleep(left.min(StdDuration::from_millis(SLEEP_SLICE_MS)));
        }
    }
}

impl<S: TickSource> TickSource for ResilientSource<S> {
    fn venue(&self) -> &str {
        self.source.venue()
    }

    fn connect(&mut self) -> Result<(), FeedError> {
        self.reconnect()
    }

    /// Stream failures are absorbed: the source is reconnected and `Ok(None)` returned.
    fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError> {
        if !self.connected {
            self.reconnect()?;
        }

        match self.source.poll_tick() {
            Ok(tick) => Ok(tick),
            Err(error) => {
                self.connected = false;
                self.stats.stream_failures += 1;
                warn!(
                    venue = self.source.venue(),
                    %error,
                    delay_ms = self.policy.delay_ms,
                    "tick stream failed, reconnecting"
                );
                self.pause();
                self.reconnect()?;
                Ok(None)
            }
        }
    }
}
