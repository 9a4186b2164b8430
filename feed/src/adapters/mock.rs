use std::collections::VecDeque;

use pricewatch::TickInput;

use crate::{FeedError, TickSource};

/// Replays a fixed list of ticks; can be told to fail connects or drop the stream.
pub struct ScriptedSource {
    ticks: VecDeque<TickInput>,
    connected: bool,
    failing_connects: u32,
    disconnect_after: Option<usize>,
    served: usize,
    connect_calls: u32,
}

impl ScriptedSource {
    pub fn new(ticks: impl IntoIterator<Item = TickInput>) -> Self {
        Self {
            ticks: ticks.into_iter().collect(),
            connected: false,
            failing_connects: 0,
            disconnect_after: None,
            served: 0,
            connect_calls: 0,
        }
    }

    /// The first `count` connect attempts fail.
    pub fn failing_connects(mut self, count: u32) -> Self {
        self.failing_connects = count;
        self
    }

    /// The stream breaks once, right after `count` ticks were served.
    pub fn disconnect_after(mut self, count: usize) -> Self {
        self.disconnect_after = Some(count);
        self
    }

    pub fn remaining(&self) -> usize {
        self.ticks.len()
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls
    }
}

impl TickSource for ScriptedSource {
    fn venue(&self) -> &str {
        "SCRIPTED"
    }

    fn connect(&mut self) -> Result<(), FeedError> {
        self.connect_calls += 1;
        if self.failing_connects > 0 {
            self.failing_connects -= 1;
            return Err(FeedError::ConnectionFailed("scripted failure".to_string()));
        }
        self.connected = true;
        Ok(())
    }

    fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError> {
        if !self.connected {
            return Err(FeedError::NotConnected);
        }

        if self.disconnect_after == Some(self.served) {
            self.disconnect_after = None;
            self.connected = false;
            return Err(FeedError::Closed);
        }

        let tick = self.ticks.pop_front();
        if tick.is_some() {
            self.served += 1;
        }
        Ok(tick)
    }
}
