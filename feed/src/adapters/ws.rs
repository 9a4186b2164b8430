use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use crossbeam::channel;
use crossbeam::queue::SegQueue;
use futures_util::StreamExt;
use pricewatch::TickInput;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::{FeedError, TickSource};

const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Price stream read from a WebSocket endpoint on a dedicated reader thread.
pub struct WsTickSource {
    url: String,
    connected: bool,
    queue: Arc<SegQueue<TickInput>>,
    ws_running: Arc<AtomicBool>,
    ws_epoch: Arc<AtomicU64>,
}

impl WsTickSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connected: false,
            queue: Arc::new(SegQueue::new()),
            ws_running: Arc::new(AtomicBool::new(false)),
            ws_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    fn spawn_ws_reader(&self) -> Result<(), FeedError> {
        let queue = Arc::clone(&self.queue);
        let ws_running = Arc::clone(&self.ws_running);
        let ws_epoch = Arc::clone(&self.ws_epoch);
        let endpoint = self.url.clone();
        let current_epoch = ws_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), FeedError>>(1);

        ws_running.store(true, Ordering::Release);
        thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(error) => {
                    ws_running.store(false, Ordering::Release);
                    let _ = ready_tx.send(Err(FeedError::ConnectionFailed(error.to_string())));
                    return;
                }
            };

            runtime.block_on(async move {
                let (stream, _) = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
                    Ok(ok) => ok,
                    Err(error) => {
                        ws_running.store(false, Ordering::Release);
                        let _ = ready_tx.send(Err(FeedError::ConnectionFailed(error.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let (_write, mut read) = stream.split();
                while let Some(msg) = read.next().await {
                    if ws_epoch.load(Ordering::Acquire) != current_epoch {
                        break;
                    }

                    match msg {
                        Ok(Message::Text(text)) => match parse_tick_message(&text) {
                            Ok(ticks) => ticks.into_iter().for_each(|tick| queue.push(tick)),
                            Err(error) => warn!(%error, "skipping unparseable price message"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(error) => {
                            warn!(%error, "websocket read failed");
                            break;
                        }
                    }
                }

                debug!(endpoint = %endpoint, "websocket reader finished");
                if ws_epoch.load(Ordering::Acquire) == current_epoch {
                    ws_running.store(false, Ordering::Release);
                }
            });
        });

        match ready_rx.recv_timeout(StdDuration::from_millis(HANDSHAKE_TIMEOUT_MS)) {
            Ok(result) => result,
            Err(_) => {
                // orphan the reader; it exits on its next frame
                self.ws_epoch.fetch_add(1, Ordering::AcqRel);
                self.ws_running.store(false, Ordering::Release);
                Err(FeedError::ConnectionFailed("handshake timed out".to_string()))
            }
        }
    }
}

impl TickSource for WsTickSource {
    fn venue(&self) -> &str {
        "WS"
    }

    fn connect(&mut self) -> Result<(), FeedError> {
        self.spawn_ws_reader()?;
        self.connected = true;
        Ok(())
    }

    fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError> {
        if !self.connected {
            return Err(FeedError::NotConnected);
        }

        if let Some(tick) = self.queue.pop() {
            return Ok(Some(tick));
        }

        if !self.ws_running.load(Ordering::Acquire) {
            self.connected = false;
            return Err(FeedError::Closed);
        }
        Ok(None)
    }
}

/// Parse one text frame into ticks.
///
/// Accepts `[timestampMs, price]`, `{"timestamp": .., "price": ..}` and
/// server-sent-event framing where each payload line is prefixed with `data:`.
/// A malformed line is skipped with a warning; the frame is an error only when
/// no line in it parses.
pub fn parse_tick_message(text: &str) -> Result<Vec<TickInput>, FeedError> {
    let mut ticks = Vec::new();
    let mut last_error = None;
    for line in text.lines().map(str::trim).filter(|x| !x.is_empty()) {
        let payload = match line.strip_prefix("data:") {
            Some(rest) => rest.trim(),
            None if is_sse_control(line) => continue,
            None => line,
        };
        match parse_tick_line(payload) {
            Ok(tick) => ticks.push(tick),
            Err(error) => {
                warn!(%error, "skipping malformed price line");
                last_error = Some(error);
            }
        }
    }
    match last_error {
        Some(error) if ticks.is_empty() => Err(error),
        _ => Ok(ticks),
    }
}

fn parse_tick_line(payload: &str) -> Result<TickInput, FeedError> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|error| FeedError::Malformed(format!("{}: {}", error, payload)))?;
    tick_from_value(&value)
}

fn is_sse_control(line: &str) -> bool {
    line.starts_with(':')
        || line.starts_with("event:")
        || line.starts_with("id:")
        || line.starts_with("retry:")
}

fn tick_from_value(value: &Value) -> Result<TickInput, FeedError> {
    let (ts, price) = match value {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        Value::Object(map) => {
            if let Some(inner) = map.get("data") {
                return tick_from_value(inner);
            }
            match (map.get("timestamp"), map.get("price")) {
                (Some(ts), Some(price)) => (ts, price),
                _ => return Err(FeedError::Malformed(format!("missing timestamp/price: {}", value))),
            }
        }
        _ => return Err(FeedError::Malformed(format!("unexpected shape: {}", value))),
    };

    let timestamp = ts
        .as_i64()
        .or_else(|| ts.as_f64().map(|x| x as i64))
        .ok_or_else(|| FeedError::Malformed(format!("bad timestamp: {}", ts)))?;
    let price = price
        .as_f64()
        .or_else(|| price.as_str().and_then(|x| x.parse::<f64>().ok()))
        .ok_or_else(|| FeedError::Malformed(format!("bad price: {}", price)))?;
    Ok(TickInput::new(timestamp, price))
}
