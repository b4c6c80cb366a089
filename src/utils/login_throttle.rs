use moka::future::Cache;
use std::time::Duration;

/// Consecutive failed logins per email. An entry expires `lockout` after
/// the last failure, which also ends the lockout.
#[derive(Clone)]
pub struct LoginThrottle {
    failures: Cache<String, u32>,
    max_attempts: u32,
}

impl LoginThrottle {
    pub fn new(max_attempts: u32, lockout: Duration) -> Self {
        Self {
            failures: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(lockout)
                .build(),
            max_attempts,
        }
    }

    fn key(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// True once the email has reached the allowed number of failures.
    pub async fn is_locked(&self, email: &str) -> bool {
        if self.max_attempts == 0 {
            return false;
        }
        self.failures
            .get(&Self::key(email))
            .await
            .is_some_and(|count| count >= self.max_attempts)
    }

    /// Records a failure and returns the new count. The increment is a
    /// single upsert, so concurrent failures are all counted.
    pub async fn record_failure(&self, email: &str) -> u32 {
        self.failures
            .entry(Self::key(email))
            .and_upsert_with(|current| async move {
                current.map_or(1, |entry| entry.into_value().saturating_add(1))
            })
            .await
            .into_value()
    }

    pub async fn reset(&self, email: &str) {
        self.failures.invalidate(&Self::key(email)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn locks_after_max_failures() {
        let throttle = LoginThrottle::new(3, Duration::from_secs(60));

        assert_eq!(throttle.record_failure("a@school.test").await, 1);
        assert_eq!(throttle.record_failure("A@School.test ").await, 2);
        assert!(!throttle.is_locked("a@school.test").await);

        assert_eq!(throttle.record_failure("a@school.test").await, 3);
        assert!(throttle.is_locked("a@school.test").await);
        assert!(!throttle.is_locked("b@school.test").await);
    }

    #[actix_web::test]
    async fn reset_clears_failures() {
        let throttle = LoginThrottle::new(1, Duration::from_secs(60));
        throttle.record_failure("a@school.test").await;
        assert!(throttle.is_locked("a@school.test").await);

        throttle.reset("a@school.test").await;
        assert!(!throttle.is_locked("a@school.test").await);
    }

    #[test]
    fn concurrent_failures_are_all_counted() {
        let throttle = LoginThrottle::new(5, Duration::from_secs(60));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let throttle = throttle.clone();
                std::thread::spawn(move || {
                    futures::executor::block_on(async {
                        for _ in 0..250 {
                            throttle.record_failure("a@school.test").await;
                        }
                    })
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let count = futures::executor::block_on(throttle.record_failure("a@school.test"));
        assert_eq!(count, 2001);
    }

    #[actix_web::test]
    async fn zero_attempts_disables_lockout() {
        let throttle = LoginThrottle::new(0, Duration::from_secs(60));
        throttle.record_failure("a@school.test").await;
        assert!(!throttle.is_locked("a@school.test").await);
    }
}
