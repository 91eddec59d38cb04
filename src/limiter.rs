//! Token-bucket limiters backing a `require` block's `limits` clause.
//!
//! The bucket follows the textbook token-bucket algorithm; the three
//! limitation kinds (byte-rate, event-rate, total-cap) share one
//! implementation with different replenishment rules.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, RuntimeErrorKind};

pub type DecrementFn = Box<dyn Fn(Duration) -> f64 + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LimitKind {
    ByteRate(f64),
    EventRate(f64),
    TotalCap(u64),
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct Limitation {
    pub name: String,
    kind: LimitKind,
    capacity: f64,
    state: Mutex<BucketState>,
    decrement_fn: Option<DecrementFn>,
}

impl std::fmt::Debug for Limitation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limitation")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Limitation {
    /// Byte-rate limits get one second's worth of bytes as bucket capacity;
    /// event-rate limits get the configured rate itself; total caps get
    /// the cap with no replenishment.
    pub fn new(name: impl Into<String>, kind: LimitKind) -> Self {
        let capacity = match kind {
            LimitKind::ByteRate(r) => r,
            LimitKind::EventRate(r) => r,
            LimitKind::TotalCap(c) => c as f64,
        };
        Limitation {
            name: name.into(),
            kind,
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            decrement_fn: None,
        }
    }

    pub fn with_decrement_fn(mut self, f: DecrementFn) -> Self {
        self.decrement_fn = Some(f);
        self
    }

    fn is_total_cap(&self) -> bool {
        matches!(self.kind, LimitKind::TotalCap(_))
    }

    fn refill_rate_per_sec(&self) -> f64 {
        match self.kind {
            LimitKind::ByteRate(r) => r,
            LimitKind::EventRate(r) => r,
            LimitKind::TotalCap(_) => 0.0,
        }
    }

    fn refill_locked(&self, state: &mut BucketState) {
        if self.is_total_cap() {
            return;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let amount = match &self.decrement_fn {
            Some(f) => f(elapsed),
            None => elapsed.as_secs_f64() * self.refill_rate_per_sec(),
        };
        state.tokens = (state.tokens + amount).min(self.capacity);
        state.last_refill = now;
    }

    /// Consumes `amount` tokens. Rate buckets block until enough tokens
    /// accumulate; total caps fail immediately rather than wait.
    pub fn take(&self, amount: f64) -> Result<(), Error> {
        if self.is_total_cap() {
            let mut state = self.state.lock().unwrap();
            if state.tokens >= amount {
                state.tokens -= amount;
                return Ok(());
            }
            return Err(Error::runtime(
                None,
                RuntimeErrorKind::LimiterExhausted(self.name.clone()),
            ));
        }

        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                self.refill_locked(&mut state);
                if state.tokens >= amount {
                    state.tokens -= amount;
                    return Ok(());
                }
                let deficit = amount - state.tokens;
                let rate = self.refill_rate_per_sec();
                if rate > 0.0 {
                    Duration::from_secs_f64(deficit / rate)
                } else {
                    Duration::from_millis(50)
                }
            };
            std::thread::sleep(wait.min(Duration::from_millis(200)));
        }
    }

    pub fn remaining(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        self.refill_locked(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_cap_fails_when_exhausted() {
        let l = Limitation::new("quota", LimitKind::TotalCap(10));
        assert!(l.take(6.0).is_ok());
        assert!(l.take(6.0).is_err());
    }

    #[test]
    fn byte_rate_allows_burst_up_to_capacity() {
        let l = Limitation::new("fs/read", LimitKind::ByteRate(1000.0));
        assert!(l.take(1000.0).is_ok());
    }

    #[test]
    fn byte_rate_second_take_waits_for_replenishment() {
        let l = Limitation::new("fs/read", LimitKind::ByteRate(1000.0));
        assert!(l.take(1000.0).is_ok());
        let start = Instant::now();
        assert!(l.take(1000.0).is_ok());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(800));
        assert!(elapsed <= Duration::from_millis(1300));
    }
}
