use pricewatch::TickInput;

use crate::error::FeedError;

/// A pull-based producer of raw price ticks.
pub trait TickSource {
    fn venue(&self) -> &str;
    fn connect(&mut self) -> Result<(), FeedError>;
    /// `Ok(None)` means nothing is buffered right now; the caller should poll again.
    fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError>;
}
