pub mod adapters;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod pump;

pub use adapters::{parse_tick_message, GbmConfig, GbmTickSource, ScriptedSource, WsTickSource};
pub use error::FeedError;
pub use lifecycle::{ReconnectPolicy, ResilientSource, SourceLifecycleStats};
pub use protocol::TickSource;
pub use pump::{pump_count, pump_ticks};

#[cfg(test)]
mod tests {
    use super::{pump_count, FeedError, ReconnectPolicy, ResilientSource, TickSource};
    use pricewatch::TickInput;

    struct FlakySource {
        connected: bool,
        connect_calls: u32,
        poll_calls: u32,
        fail_first_connect: bool,
        fail_first_poll: bool,
        next_ts: i64,
    }

    impl FlakySource {
        fn new() -> Self {
            Self {
                connected: false,
                connect_calls: 0,
                poll_calls: 0,
                fail_first_connect: true,
                fail_first_poll: true,
                next_ts: 1_700_000_040_000,
            }
        }
    }

    impl TickSource for FlakySource {
        fn venue(&self) -> &str {
            "TEST"
        }

        fn connect(&mut self) -> Result<(), FeedError> {
            self.connect_calls += 1;
            if self.fail_first_connect {
                self.fail_first_connect = false;
                return Err(FeedError::ConnectionFailed("first connect fails".to_string()));
            }
            self.connected = true;
            Ok(())
        }

        fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError> {
            if !self.connected {
                return Err(FeedError::NotConnected);
            }

            self.poll_calls += 1;
            if self.fail_first_poll {
                self.fail_first_poll = false;
                self.connected = false;
                return Err(FeedError::Closed);
            }

            self.next_ts += 250;
            Ok(Some(TickInput::new(self.next_ts, 100.0)))
        }
    }

    #[test]
    fn resilient_source_reconnects_after_connect_and_stream_failures() {
        let mut resilient = ResilientSource::new(
            FlakySource::new(),
            ReconnectPolicy {
                delay_ms: 0,
                max_retries: Some(3),
            },
        );
        let (tx, rx) = crossbeam::channel::unbounded();

        let published = pump_count(&mut resilient, &tx, 2).expect("resilient pumping should recover");
        assert_eq!(published, 2);
        assert_eq!(rx.try_iter().count(), 2);

        let stats = resilient.stats();
        assert_eq!(stats.connect_failures, 1);
        assert_eq!(stats.stream_failures, 1);
        assert_eq!(stats.reconnect_total, 2);
        assert!(resilient.is_connected());
        assert_eq!(resilient.inner().connect_calls, 3);
        assert_eq!(resilient.inner().poll_calls, 3);
    }

    #[test]
    fn bounded_policy_gives_up() {
        struct Down;

        impl TickSource for Down {
            fn venue(&self) -> &str {
                "DOWN"
            }

            fn connect(&mut self) -> Result<(), FeedError> {
                Err(FeedError::ConnectionFailed("refused".to_string()))
            }

            fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError> {
                Err(FeedError::NotConnected)
            }
        }

        let mut resilient = ResilientSource::new(
            Down,
            ReconnectPolicy {
                delay_ms: 0,
                max_retries: Some(2),
            },
        );
        assert!(matches!(resilient.poll_tick(), Err(FeedError::ConnectionFailed(_))));
        assert_eq!(resilient.stats().connect_failures, 3);
    }

    #[test]
    fn default_policy_retries_forever_every_five_seconds() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_ms, 5000);
        assert_eq!(policy.max_retries, None);
    }
}
