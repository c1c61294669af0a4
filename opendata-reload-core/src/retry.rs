//! Bounded retry for the two remote-heavy steps, upload and truncate+append.
//!
//! Every attempt starts by re-establishing the content store session
//! ([`ContentStore::reconnect`]); long idle periods were observed to leave the previous session
//! silently stale. Any error, from the reconnect or from the wrapped operation, counts as a
//! failed attempt and is noted with its attempt number.

use std::future::Future;

use thiserror::Error;

use crate::config::DEFAULT_MAX_TRIES;
use crate::contract::ContentStore;
use crate::error::ReloadError;
use crate::events::EventLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_tries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: DEFAULT_MAX_TRIES,
        }
    }
}

/// Value of a successful operation and the attempt that produced it (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

#[derive(Debug, Error)]
#[error("{label} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub label: String,
    pub attempts: u32,
    pub last_error: ReloadError,
}

impl RetryPolicy {
    /// At least one attempt is always made; `0` is treated as `1`.
    pub fn new(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.max(1),
        }
    }

    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Run `op` up to `max_tries` times, reconnecting `store` before each attempt.
    ///
    /// `op` receives the attempt number. The first `Ok` wins; no attempt is made after it or
    /// beyond `max_tries`.
    pub async fn run<S, T, F, Fut>(
        &self,
        store: &S,
        events: &mut EventLog,
        label: &str,
        mut op: F,
    ) -> Result<Attempted<T>, RetryExhausted>
    where
        S: ContentStore + ?Sized,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ReloadError>>,
    {
        let mut last_error = None;

        for attempt in 1..=self.max_tries {
            events.note("Making fresh connection to content store...");
            let result = match store.reconnect().await {
                Ok(()) => {
                    events.note(format!("Try #{attempt} - {label}..."));
                    op(attempt).await
                }
                Err(e) => Err(ReloadError::TransientIo(format!("reconnect failed: {e}"))),
            };

            match result {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    })
                }
                Err(e) => {
                    events.note(format!(
                        "Try #{attempt} - something went wrong with {label}: {e}"
                    ));
                    last_error = Some(e);
                }
            }
        }

        Err(RetryExhausted {
            label: label.to_string(),
            attempts: self.max_tries,
            last_error: last_error
                .unwrap_or_else(|| ReloadError::Config(format!("no attempts allowed for {label}"))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockContentStore;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn reconnecting_store(times: usize) -> MockContentStore {
        let mut store = MockContentStore::new();
        store.expect_reconnect().times(times).returning(|| Ok(()));
        store
    }

    #[tokio::test]
    async fn succeeds_on_attempt_k_after_k_minus_one_failures() {
        for k in 1..=3u32 {
            let store = reconnecting_store(k as usize);
            let calls = AtomicU32::new(0);
            let mut events = EventLog::new();

            let result = RetryPolicy::new(3)
                .run(&store, &mut events, "upload", |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < k {
                            Err(ReloadError::TransientIo("flaky".into()))
                        } else {
                            Ok(attempt * 10)
                        }
                    }
                })
                .await
                .expect("should succeed within max tries");

            assert_eq!(result.attempts, k);
            assert_eq!(result.value, k * 10);
            assert_eq!(calls.load(Ordering::SeqCst), k);
            let failures = events
                .notes()
                .iter()
                .filter(|n| n.text.contains("something went wrong with upload"))
                .count();
            assert_eq!(failures as u32, k - 1);
        }
    }

    #[tokio::test]
    async fn stops_after_exactly_max_tries() {
        let store = reconnecting_store(3);
        let calls = AtomicU32::new(0);
        let mut events = EventLog::new();

        let err = RetryPolicy::new(3)
            .run(&store, &mut events, "truncate+append", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(ReloadError::TransientIo("down".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err.last_error, ReloadError::TransientIo(_)));
        assert!(events.notes().iter().any(|n| n.text.starts_with("Try #3")));
        assert!(!events.notes().iter().any(|n| n.text.starts_with("Try #4")));
    }

    #[tokio::test]
    async fn zero_tries_still_makes_one_attempt() {
        let store = reconnecting_store(1);
        let mut events = EventLog::new();
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_tries(), 1);

        let result = policy
            .run(&store, &mut events, "upload", |attempt| async move { Ok(attempt) })
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn failed_reconnect_counts_as_an_attempt() {
        let mut store = MockContentStore::new();
        let mut calls = 0;
        store.expect_reconnect().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Err(StoreError::Transport("connection reset".into()))
            } else {
                Ok(())
            }
        });
        let mut events = EventLog::new();

        let result = RetryPolicy::new(3)
            .run(&store, &mut events, "upload", |attempt| async move { Ok(attempt) })
            .await
            .unwrap();

        assert_eq!(result.attempts, 2);
        assert_eq!(result.value, 2);
    }
}
