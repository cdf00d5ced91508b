//! Continuous-refill allowance buckets mirroring the server's quotas.
//!
//! The server never reports remaining allowance; the client models it
//! locally so it can pace outgoing actions instead of having them
//! rejected. A bucket refills at `capacity / fill_time` units per second
//! up to `capacity`; admin rank flips the `infinite` flag, which bypasses
//! every limit without touching the accumulated allowance.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Padding added to every refill estimate so the client never asks a
/// fraction of a second before the server's own refill tick.
pub const SAFETY_MARGIN: Duration = Duration::from_millis(100);

/// Poll interval while a bucket has no fill rate at all (capacity or
/// fill time of zero, waiting for the server to assign a real quota).
const UNFILLED_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u16,
    fill_time: u16,
    allowance: f64,
    infinite: bool,
    last_update: Instant,
}

impl TokenBucket {
    /// `fill` starts the allowance at capacity instead of zero.
    pub fn new(capacity: u16, fill_time: u16, fill: bool) -> Self {
        TokenBucket {
            capacity,
            fill_time,
            allowance: if fill { capacity as f64 } else { 0.0 },
            infinite: false,
            last_update: Instant::now(),
        }
    }

    /// A zero-capacity bucket, spendable only once the server assigns a
    /// real quota.
    pub fn empty() -> Self {
        TokenBucket::new(0, 0, false)
    }

    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    pub fn fill_time(&self) -> u16 {
        self.fill_time
    }

    pub fn infinite(&self) -> bool {
        self.infinite
    }

    /// Allowance units regenerated per second.
    pub fn fill_rate(&self) -> f64 {
        if self.fill_time == 0 {
            0.0
        } else {
            self.capacity as f64 / self.fill_time as f64
        }
    }

    /// Seconds per single allowance unit, `None` while the bucket has no
    /// fill rate.
    pub fn fill_interval(&self) -> Option<Duration> {
        let rate = self.fill_rate();
        if rate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / rate))
        } else {
            None
        }
    }

    /// Advances the allowance by the elapsed wall-clock time, clamped to
    /// capacity.
    pub fn update(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.allowance = (self.allowance + self.fill_rate() * elapsed).min(self.capacity as f64);
        self.last_update = now;
    }

    pub fn allowance(&mut self) -> f64 {
        self.update();
        self.allowance
    }

    pub fn is_full(&mut self) -> bool {
        self.allowance() >= self.capacity as f64
    }

    pub fn is_empty(&mut self) -> bool {
        self.allowance() <= 0.0
    }

    pub fn can_spend(&mut self, amount: f64) -> bool {
        self.infinite || amount <= self.allowance()
    }

    /// Spends `amount` if available. Infinite buckets always succeed and
    /// are never mutated.
    pub fn try_spend(&mut self, amount: f64) -> bool {
        if self.infinite {
            return true;
        }
        if !self.can_spend(amount) {
            return false;
        }
        self.allowance -= amount;
        true
    }

    /// How long until `amount` more allowance has regenerated, plus the
    /// safety margin. `None` means never at the current fill rate.
    pub fn time_to_fill(&mut self, amount: f64) -> Option<Duration> {
        if self.infinite || amount <= 0.0 {
            return Some(Duration::ZERO);
        }
        self.update();
        let rate = self.fill_rate();
        if rate <= 0.0 {
            return None;
        }
        let capped = amount.min(self.capacity as f64);
        Some(Duration::from_secs_f64(capped / rate) + SAFETY_MARGIN)
    }

    /// Time until the allowance reaches `amount`.
    pub fn time_until_has(&mut self, amount: f64) -> Option<Duration> {
        let deficit = amount - self.allowance();
        self.time_to_fill(deficit)
    }

    pub fn time_until_full(&mut self) -> Option<Duration> {
        let deficit = self.capacity as f64 - self.allowance();
        self.time_to_fill(deficit)
    }

    /// Replaces capacity and fill time. Accumulated allowance persists
    /// unless `fill` is set; a shrunken capacity clamps on the next
    /// update.
    pub fn set_params(&mut self, capacity: u16, fill_time: u16, fill: bool) {
        self.capacity = capacity;
        self.fill_time = fill_time;
        if fill {
            self.allowance = capacity as f64;
        }
        self.last_update = Instant::now();
    }

    /// Toggles the no-limit flag without resetting the allowance, so a
    /// demotion resumes from where the quota left off.
    pub fn set_infinite(&mut self, infinite: bool) {
        self.infinite = infinite;
    }
}

impl std::fmt::Display for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.2}/{}] @{:.2}a/s",
            self.allowance,
            self.capacity,
            self.fill_rate()
        )
    }
}

/// A bucket shared between the world, its action queues, and direct
/// spenders. The lock is never held across a sleep.
#[derive(Clone)]
pub struct SharedBucket {
    inner: Arc<Mutex<TokenBucket>>,
}

impl SharedBucket {
    pub fn new(bucket: TokenBucket) -> Self {
        SharedBucket {
            inner: Arc::new(Mutex::new(bucket)),
        }
    }

    pub async fn try_spend(&self, amount: f64) -> bool {
        self.inner.lock().await.try_spend(amount)
    }

    pub async fn allowance(&self) -> f64 {
        self.inner.lock().await.allowance()
    }

    pub async fn infinite(&self) -> bool {
        self.inner.lock().await.infinite()
    }

    pub async fn set_infinite(&self, infinite: bool) {
        self.inner.lock().await.set_infinite(infinite);
    }

    pub async fn set_params(&self, capacity: u16, fill_time: u16, fill: bool) {
        self.inner.lock().await.set_params(capacity, fill_time, fill);
    }

    pub async fn fill_interval(&self) -> Option<Duration> {
        self.inner.lock().await.fill_interval()
    }

    /// Sleeps until the bucket should hold at least one allowance unit.
    /// Buckets without a fill rate are polled until a quota arrives.
    pub async fn delay_any(&self) {
        loop {
            let delay = self.inner.lock().await.time_until_has(1.0);
            match delay {
                Some(d) if d.is_zero() => return,
                Some(d) => {
                    tokio::time::sleep(d).await;
                    return;
                }
                None => tokio::time::sleep(UNFILLED_POLL).await,
            }
        }
    }

    /// Sleeps until the bucket should be completely refilled.
    pub async fn delay_until_full(&self) {
        loop {
            let delay = self.inner.lock().await.time_until_full();
            match delay {
                Some(d) if d.is_zero() => return,
                Some(d) => {
                    tokio::time::sleep(d).await;
                    return;
                }
                None => tokio::time::sleep(UNFILLED_POLL).await,
            }
        }
    }
}
