use std::sync::Mutex;

use chrono::Utc;

const WORKER_ID_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const MAX_WORKER_ID: u64 = (1 << WORKER_ID_BITS) - 1;
const WORKER_ID_SHIFT: u64 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u64 = SEQUENCE_BITS + WORKER_ID_BITS;

const EPOCH_MS: u64 = 1735689600000;

pub const WORKER_RULE: u64 = 1;

#[derive(Debug)]
struct Inner {
    sequence: u64,
    last_timestamp: u64,
}

/// Snowflake-style ids: 41 bits of ms since 2025-01-01, 10 bits worker, 12 bits sequence.
#[derive(Debug)]
pub struct IdGenerator {
    worker_id: u64,
    inner: Mutex<Inner>,
}

impl IdGenerator {
    pub fn new(worker_id: u64) -> Self {
        Self {
            worker_id: worker_id & MAX_WORKER_ID,
            inner: Mutex::new(Inner {
                sequence: 0,
                last_timestamp: 0,
            }),
        }
    }

    pub fn next_id(&self) -> u64 {
        let mut guard = self.inner.lock().expect("id generator mutex poisoned");
        let mut ts = current_timestamp_ms();

        if ts < guard.last_timestamp {
            ts = guard.last_timestamp;
        }

        if ts == guard.last_timestamp {
            guard.sequence = (guard.sequence + 1) & MAX_SEQUENCE;
            if guard.sequence == 0 {
                // sequence exhausted within this millisecond; borrow the next one
                ts = guard.last_timestamp + 1;
            }
        } else {
            guard.sequence = 0;
        }

        guard.last_timestamp = ts;

        (ts.saturating_sub(EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.worker_id << WORKER_ID_SHIFT)
            | guard.sequence
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(WORKER_RULE)
    }
}

fn current_timestamp_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}
