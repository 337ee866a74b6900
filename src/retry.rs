//! Bounded retry around stream acquisition.
//!
//! The platform intermittently answers 429/403 for requests that succeed
//! moments later; those two classes are retried with a linearly growing
//! delay. Everything else is final. Retries only ever happen before the
//! relay starts, so the client never observes a restarted response.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::OpenError;
use crate::upstream::{AudioStream, MediaSource};

/// Retry bounds for upstream opens.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (2 means 3 attempts total).
    pub max_retries: u32,
    /// The wait before retry n is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1500),
        }
    }
}

/// Open the upstream stream, retrying transient rejections.
///
/// Each retry is a wholly new open; anything received during a failed
/// attempt is discarded, never resumed.
pub async fn open_with_retry(
    source: &dyn MediaSource,
    url: &str,
    policy: &RetryPolicy,
) -> Result<AudioStream, OpenError> {
    let mut attempt = 0u32;
    loop {
        match source.open(url).await {
            Ok(stream) => {
                if attempt > 0 {
                    debug!(url, attempts = attempt + 1, "upstream open succeeded after retry");
                }
                return Ok(stream);
            }
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.base_delay * attempt;
                warn!(
                    url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "upstream rejected open, retrying: {e}"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(url, attempts = attempt + 1, "upstream open failed: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Source that fails with the scripted statuses, then succeeds.
    struct ScriptedSource {
        failures: Mutex<Vec<u16>>,
        opens: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(failures: &[u16]) -> Self {
            Self {
                failures: Mutex::new(failures.to_vec()),
                opens: AtomicUsize::new(0),
            }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MediaSource for ScriptedSource {
        async fn open(&self, _url: &str) -> Result<AudioStream, OpenError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock().unwrap();
            if failures.is_empty() {
                Ok(AudioStream::new(futures_util::stream::empty()))
            } else {
                Err(OpenError::from_status(failures.remove(0)))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_succeeds_on_third_attempt() {
        let source = ScriptedSource::new(&[429, 429]);
        let start = Instant::now();

        let result = open_with_retry(&source, "url", &RetryPolicy::default()).await;

        assert!(result.is_ok());
        assert_eq!(source.opens(), 3);
        // 1500ms before the second attempt, 3000ms before the third.
        assert_eq!(start.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn forbidden_exhausts_after_three_attempts() {
        let source = ScriptedSource::new(&[403, 403, 403, 403]);

        let result = open_with_retry(&source, "url", &RetryPolicy::default()).await;

        assert!(matches!(result, Err(OpenError::Forbidden { .. })));
        assert_eq!(source.opens(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_fails_immediately_without_delay() {
        let source = ScriptedSource::new(&[404]);
        let start = Instant::now();

        let result = open_with_retry(&source, "url", &RetryPolicy::default()).await;

        assert!(matches!(result, Err(OpenError::NotFound { .. })));
        assert_eq!(source.opens(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_not_retried() {
        struct NetworkFailSource(AtomicUsize);

        #[async_trait]
        impl MediaSource for NetworkFailSource {
            async fn open(&self, _url: &str) -> Result<AudioStream, OpenError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Err(OpenError::Network("connection reset".to_string()))
            }
        }

        let source = NetworkFailSource(AtomicUsize::new(0));
        let result = open_with_retry(&source, "url", &RetryPolicy::default()).await;

        assert!(matches!(result, Err(OpenError::Network(_))));
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }
}
