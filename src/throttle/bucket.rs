//! Async token bucket with a bounded, oldest-first waiter queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Tokens consumed by one admitted attempt.
#[must_use = "a lease records an admission; drop it once the attempt is over"]
#[derive(Debug)]
pub struct RateLease {
    permits: u32,
}

impl RateLease {
    pub fn permits(&self) -> u32 {
        self.permits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    /// Accepting this waiter would exceed the queue limit.
    QueueFull,
    /// The request can never be satisfied by this bucket.
    TooLarge { requested: u32, capacity: u32 },
    ZeroWeight,
}

struct Waiter {
    ticket: u64,
    permits: u32,
}

struct BucketState {
    tokens: u32,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    queued_permits: u32,
    next_ticket: u64,
}

pub struct TokenBucket {
    capacity: u32,
    refill_amount: u32,
    refill_period: Duration,
    queue_limit: u32,
    state: Mutex<BucketState>,
    notify: Notify,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_amount: config.refill_amount,
            refill_period: config.refill_period,
            queue_limit: config.queue_limit,
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
                queue: VecDeque::new(),
                queued_permits: 0,
                next_ticket: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tokens available right now.
    pub fn available(&self) -> u32 {
        let mut state = self.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }

    pub fn queued_permits(&self) -> u32 {
        self.lock().queued_permits
    }

    /// Add whole refill periods elapsed since the last refill.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let period = self.refill_period.as_nanos().max(1);
        let periods = elapsed.as_nanos() / period;
        if periods == 0 {
            return;
        }
        let added = periods.saturating_mul(self.refill_amount as u128);
        let tokens = (state.tokens as u128).saturating_add(added);
        state.tokens = tokens.min(self.capacity as u128) as u32;
        let remainder = Duration::from_nanos((elapsed.as_nanos() % period) as u64);
        state.last_refill = now - remainder;
    }

    /// Wait for `permits` tokens. Waiters are served strictly in arrival order;
    /// dropping the future gives up the place in the queue.
    pub async fn acquire(&self, permits: u32) -> Result<RateLease, AcquireError> {
        if permits == 0 {
            return Err(AcquireError::ZeroWeight);
        }
        if permits > self.capacity {
            return Err(AcquireError::TooLarge {
                requested: permits,
                capacity: self.capacity,
            });
        }

        let ticket = {
            let mut state = self.lock();
            self.refill(&mut state, Instant::now());
            if state.queue.is_empty() && state.tokens >= permits {
                state.tokens -= permits;
                return Ok(RateLease { permits });
            }
            if state.queued_permits.saturating_add(permits) > self.queue_limit {
                return Err(AcquireError::QueueFull);
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.queue.push_back(Waiter { ticket, permits });
            state.queued_permits += permits;
            ticket
        };

        let mut guard = QueueGuard {
            bucket: self,
            ticket,
            armed: true,
        };

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                self.refill(&mut state, Instant::now());
                let at_head = state.queue.front().map(|w| w.ticket) == Some(ticket);
                if at_head && state.tokens >= permits {
                    state.tokens -= permits;
                    state.queue.pop_front();
                    state.queued_permits -= permits;
                    guard.armed = false;
                    drop(state);
                    // Let the next waiter check whether it is now servable.
                    self.notify.notify_waiters();
                    return Ok(RateLease { permits });
                }
                at_head.then(|| state.last_refill + self.refill_period)
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

/// Removes an abandoned waiter from the queue.
struct QueueGuard<'a> {
    bucket: &'a TokenBucket,
    ticket: u64,
    armed: bool,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.bucket.lock();
        if let Some(pos) = state.queue.iter().position(|w| w.ticket == self.ticket) {
            if let Some(waiter) = state.queue.remove(pos) {
                state.queued_permits -= waiter.permits;
            }
        }
        drop(state);
        self.bucket.notify.notify_waiters();
    }
}
