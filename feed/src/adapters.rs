pub mod gbm;
pub mod mock;
pub mod ws;

pub use gbm::{GbmConfig, GbmTickSource};
pub use mock::ScriptedSource;
pub use ws::{parse_tick_message, WsTickSource};
