use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

/// Number of tracked callers above which expired windows are dropped on the next check.
const EVICTION_THRESHOLD: usize = 1024;

/// Fixed-window request counter keyed by caller address.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<IpAddr, Window>>,
}

struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, ip: IpAddr) -> RateLimitDecision {
        self.check_at(ip, Instant::now())
    }

    /// Counts one request from `ip` at `now`.
    pub fn check_at(&self, ip: IpAddr, now: Instant) -> RateLimitDecision {
        // A panic elsewhere cannot leave a window half-updated, so the map stays usable.
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        if windows.len() >= EVICTION_THRESHOLD {
            windows.retain(|_, window| now.duration_since(window.started) < self.window);
        }

        let window = windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(window.started);
        if elapsed >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count >= self.max_requests {
            return RateLimitDecision::Limited {
                retry_after: self
                    .window
                    .saturating_sub(now.duration_since(window.started)),
            };
        }
        window.count += 1;
        RateLimitDecision::Allowed {
            remaining: self.max_requests - window.count,
        }
    }

    /// Drops every window which has run out, returning how many were removed.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let before = windows.len();
        windows.retain(|_, window| now.duration_since(window.started) < self.window);
        before - windows.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimitDecision, RateLimiter, EVICTION_THRESHOLD};
    use googletest::prelude::*;
    use std::{
        net::{IpAddr, Ipv4Addr},
        sync::Arc,
        time::{Duration, Instant},
    };

    const WINDOW: Duration = Duration::from_secs(15 * 60);

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, last))
    }

    #[googletest::test]
    fn allows_up_to_limit_then_rejects() -> Result<()> {
        let limiter = RateLimiter::new(5, WINDOW);
        let now = Instant::now();

        let decisions: Vec<_> = (0..6).map(|_| limiter.check_at(ip(1), now)).collect();

        verify_that!(
            decisions,
            elements_are![
                eq(RateLimitDecision::Allowed { remaining: 4 }),
                eq(RateLimitDecision::Allowed { remaining: 3 }),
                eq(RateLimitDecision::Allowed { remaining: 2 }),
                eq(RateLimitDecision::Allowed { remaining: 1 }),
                eq(RateLimitDecision::Allowed { remaining: 0 }),
                eq(RateLimitDecision::Limited {
                    retry_after: WINDOW
                }),
            ]
        )
    }

    #[googletest::test]
    fn counts_callers_separately() -> Result<()> {
        let limiter = RateLimiter::new(1, WINDOW);
        let now = Instant::now();

        limiter.check_at(ip(1), now);

        verify_that!(
            limiter.check_at(ip(2), now),
            eq(RateLimitDecision::Allowed { remaining: 0 })
        )
    }

    #[googletest::test]
    fn reports_time_until_window_ends() -> Result<()> {
        let limiter = RateLimiter::new(1, WINDOW);
        let start = Instant::now();

        limiter.check_at(ip(1), start);

        verify_that!(
            limiter.check_at(ip(1), start + Duration::from_secs(60)),
            eq(RateLimitDecision::Limited {
                retry_after: WINDOW - Duration::from_secs(60)
            })
        )
    }

    #[googletest::test]
    fn starts_new_window_once_old_one_expires() -> Result<()> {
        let limiter = RateLimiter::new(2, WINDOW);
        let start = Instant::now();
        limiter.check_at(ip(1), start);
        limiter.check_at(ip(1), start);

        verify_that!(
            limiter.check_at(ip(1), start + WINDOW),
            eq(RateLimitDecision::Allowed { remaining: 1 })
        )
    }

    #[googletest::test]
    fn evicts_expired_windows() -> Result<()> {
        let limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();
        limiter.check_at(ip(1), start);
        limiter.check_at(ip(2), start + Duration::from_secs(600));

        let evicted = limiter.evict_expired_at(start + WINDOW);

        expect_that!(evicted, eq(1));
        verify_that!(limiter.tracked_callers(), eq(1))
    }

    #[googletest::test]
    fn evicts_on_check_once_map_grows_large() -> Result<()> {
        let limiter = RateLimiter::new(5, WINDOW);
        let start = Instant::now();
        for i in 0..EVICTION_THRESHOLD {
            let octets = (i as u32).to_be_bytes();
            limiter.check_at(
                IpAddr::V4(Ipv4Addr::new(10, octets[1], octets[2], octets[3])),
                start,
            );
        }

        limiter.check_at(ip(1), start + WINDOW);

        verify_that!(limiter.tracked_callers(), eq(1))
    }

    #[googletest::test]
    fn enforces_limit_across_threads() -> Result<()> {
        let limiter = Arc::new(RateLimiter::new(5, WINDOW));
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || limiter.check(ip(1)))
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|decision| matches!(decision, RateLimitDecision::Allowed { .. }))
            .count();

        verify_that!(allowed, eq(5))
    }
}
