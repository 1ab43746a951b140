//! Process-wide request throttle for the metadata service.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

const MIN_GATE_SLEEP: Duration = Duration::from_millis(1);

/// Fixed-interval gate: one request per `1 / requests_per_second`, no burst.
/// Share one instance (behind an `Arc`) between every caller so the aggregate
/// rate, not the per-worker rate, stays under the ceiling.
pub struct RateGate {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    clock: DefaultClock,
    interval: Duration,
}

impl RateGate {
    pub fn per_second(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)),
            clock: DefaultClock::default(),
            interval: Duration::from_secs(1) / rate.get(),
        }
    }

    /// Blocks until a request slot is free. Each wait is at most one interval.
    pub fn acquire(&self) {
        loop {
            match self.limiter.check() {
                Ok(()) => return,
                Err(not_until) => {
                    let wait = not_until
                        .wait_time_from(self.clock.now())
                        .clamp(MIN_GATE_SLEEP, self.interval);
                    std::thread::sleep(wait);
                }
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::RateGate;

    #[test]
    fn test_interval_matches_requested_rate() {
        assert_eq!(RateGate::per_second(4).interval(), Duration::from_millis(250));
        assert_eq!(RateGate::per_second(0).interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_sequential_acquires_are_spaced_by_interval() {
        let gate = RateGate::per_second(20);
        let started = Instant::now();
        for _ in 0..5 {
            gate.acquire();
        }
        // First slot is immediate, the remaining four wait ~50ms each.
        assert!(started.elapsed() >= Duration::from_millis(180));
    }

    #[test]
    fn test_gate_bounds_aggregate_rate_across_threads() {
        let gate = RateGate::per_second(20);
        let started = Instant::now();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    gate.acquire();
                    gate.acquire();
                });
            }
        });
        // Eight slots shared by four workers still need seven intervals.
        assert!(started.elapsed() >= Duration::from_millis(330));
    }
}
