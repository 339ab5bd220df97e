//! Continuously refilling token bucket.
//!
//! Pure arithmetic over a caller-supplied clock reading: no locking and no I/O,
//! so the registry can run it inside its critical section.

/// Per-client token bucket state.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    tokens: f64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// Creates a bucket holding `capacity` tokens, last refilled at `now_ms`.
    #[must_use]
    pub fn full(capacity: u32, now_ms: u64) -> Self {
        Self {
            tokens: f64::from(capacity),
            last_refill_ms: now_ms,
        }
    }

    /// Currently held tokens (fractional).
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Credits the tokens accrued since the last refill, capped at `capacity`.
    ///
    /// A clock reading earlier than the last refill credits nothing.
    #[allow(clippy::cast_precision_loss)]
    pub fn refill(&mut self, now_ms: u64, capacity: u32, rate_per_sec: f64) {
        let elapsed_ms = now_ms.saturating_sub(self.last_refill_ms);
        if elapsed_ms > 0 {
            // Multiply before dividing so integral rates yield exact whole tokens.
            let accrued = elapsed_ms as f64 * rate_per_sec / 1000.0;
            self.tokens = (self.tokens + accrued).min(f64::from(capacity));
            self.last_refill_ms = now_ms;
        }
    }

    /// Refills, then consumes one token if available.
    ///
    /// Returns `false` without consuming anything when less than one whole
    /// token is held.
    pub fn try_acquire(&mut self, now_ms: u64, capacity: u32, rate_per_sec: f64) -> bool {
        self.refill(now_ms, capacity, rate_per_sec);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
