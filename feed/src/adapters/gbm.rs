use std::collections::VecDeque;
use std::f64::consts::PI;
use std::time::{Duration as StdDuration, Instant};

use chrono::Utc;
use pricewatch::TickInput;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{FeedError, TickSource};

const PRICE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GbmConfig {
    pub initial_price: f64,
    pub drift: f64,
    pub volatility: f64,
    pub count_per_batch: usize,
    pub batch_interval_ms: u64,
}

impl Default for GbmConfig {
    fn default() -> Self {
        Self {
            initial_price: 100.0,
            drift: 0.0001,
            volatility: 0.005,
            count_per_batch: 10,
            batch_interval_ms: 1000,
        }
    }
}

/// Simulated price stream following geometric Brownian motion.
///
/// Ticks are produced in batches of `count_per_batch`, one batch per
/// `batch_interval_ms`, stamped with the wall clock at generation time.
pub struct GbmTickSource {
    config: GbmConfig,
    price: f64,
    rng: StdRng,
    pending: VecDeque<TickInput>,
    next_batch_at: Option<Instant>,
    connected: bool,
}

impl GbmTickSource {
    pub fn new(config: GbmConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_seed(config: GbmConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: GbmConfig, rng: StdRng) -> Self {
        Self {
            price: config.initial_price.max(PRICE_FLOOR),
            config,
            rng,
            pending: VecDeque::new(),
            next_batch_at: None,
            connected: false,
        }
    }

    pub fn price(&self) -> f64 {
        self.price
    }

    /// Advance the walk by one step and return the rounded price.
    pub fn step(&mut self) -> f64 {
        let shock = self.standard_normal();
        let delta = self.price * (self.config.drift + self.config.volatility * shock);
        self.price = (self.price + delta).max(PRICE_FLOOR);
        (self.price * 100.0).round() / 100.0
    }

    // Box-Muller on (0, 1) uniforms.
    fn standard_normal(&mut self) -> f64 {
        let u: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let v: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
    }

    fn fill_batch(&mut self) {
        let now = Utc::now().timestamp_millis();
        for _ in 0..self.config.count_per_batch.max(1) {
            let price = self.step();
            self.pending.push_back(TickInput::new(now, price));
        }
        self.next_batch_at =
            Some(Instant::now() + StdDuration::from_millis(self.config.batch_interval_ms));
    }
}

impl TickSource for GbmTickSource {
    fn venue(&self) -> &str {
        "GBM"
    }

    fn connect(&mut self) -> Result<(), FeedError> {
        self.connected = true;
        Ok(())
    }

    fn poll_tick(&mut self) -> Result<Option<TickInput>, FeedError> {
        if !self.connected {
            return Err(FeedError::NotConnected);
        }

        if self.pending.is_empty() && self.next_batch_at.is_none_or(|at| Instant::now() >= at) {
            self.fill_batch();
        }
        Ok(self.pending.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::{GbmConfig, GbmTickSource};
    use crate::{FeedError, TickSource};

    #[test]
    fn gbm_source_emits_one_batch_per_interval() {
        let mut source = GbmTickSource::with_seed(
            GbmConfig {
                count_per_batch: 4,
                batch_interval_ms: 60_000,
                ..GbmConfig::default()
            },
            7,
        );
        assert_eq!(source.poll_tick(), Err(FeedError::NotConnected));
        source.connect().expect("simulator should connect");

        let mut batch = Vec::new();
        while let Some(tick) = source.poll_tick().expect("poll should succeed") {
            batch.push(tick);
        }
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|x| x.timestamp == batch[0].timestamp));
        assert!(batch.iter().all(|x| x.price >= 0.01));
    }

    #[test]
    fn prices_are_rounded_and_floored() {
        let mut source = GbmTickSource::with_seed(
            GbmConfig {
                initial_price: 0.02,
                drift: -0.9,
                volatility: 0.0,
                ..GbmConfig::default()
            },
            1,
        );
        for _ in 0..20 {
            let price = source.step();
            assert!(price >= 0.01);
            assert_eq!((price * 100.0).round() / 100.0, price);
        }
        assert_eq!(source.price(), 0.01);
    }

    #[test]
    fn same_seed_same_walk() {
        let mut a = GbmTickSource::with_seed(GbmConfig::default(), 42);
        let mut b = GbmTickSource::with_seed(GbmConfig::default(), 42);
        let walk_a = (0..50).map(|_| a.step()).collect::<Vec<_>>();
        let walk_b = (0..50).map(|_| b.step()).collect::<Vec<_>>();
        assert_eq!(walk_a, walk_b);
    }
}
