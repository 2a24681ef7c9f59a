// crates/adapters/src/rate_limiter.rs
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Token bucket rate limiter with a cap on in-flight requests
pub struct RateLimiter {
    tokens: Arc<Mutex<TokenBucket>>,
    semaphore: Arc<Semaphore>,
}

struct TokenBucket {
    capacity: f64,
    available: f64,
    refill_rate: f64, // tokens per second
    last_refill: Instant,
}

impl TokenBucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available = (self.available + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.available >= 1.0 {
            self.available -= 1.0;
            return Ok(());
        }
        if self.refill_rate <= 0.0 {
            return Err(Duration::from_secs(1));
        }
        let missing = 1.0 - self.available;
        Err(Duration::from_secs_f64(missing / self.refill_rate))
    }
}

impl RateLimiter {
    pub fn new(capacity: usize, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            tokens: Arc::new(Mutex::new(TokenBucket {
                capacity: capacity as f64,
                available: capacity as f64,
                refill_rate: refill_per_sec.max(0.0),
                last_refill: Instant::now(),
            })),
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Acquire a token, waiting if necessary
    pub async fn acquire(&self) -> Option<RateLimitGuard> {
        // The semaphore is never closed, so this only fails on shutdown paths.
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;

        loop {
            let wait = {
                let mut bucket = self.tokens.lock();
                match bucket.take() {
                    Ok(()) => break,
                    Err(wait) => wait,
                }
            };
            tokio::time::sleep(wait).await;
        }

        Some(RateLimitGuard { _permit: permit })
    }
}

/// Holds one in-flight slot until dropped
pub struct RateLimitGuard {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
