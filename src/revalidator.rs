//! C14 — scheduled background revalidation with per-key failure backoff
//! (§4.14). A key can only ever have one outstanding scheduled task; the
//! "schedule under lock" step only marks a key pending once the executor
//! has actually accepted the task, so a rejected spawn never leaks into
//! `pending`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Semaphore;

use crate::entry::{header_get_all, HeaderList};

const BASE_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(60);
const MAX_BACKOFF_SHIFT: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    Success,
    Failed,
}

/// A response is a failed revalidation iff its status is `>= 500` or it
/// carries a stale/failed `Warning` (`110…`/`111…`).
pub fn classify_outcome(status: u16, headers: &HeaderList) -> RevalidationOutcome {
    if status >= 500 {
        return RevalidationOutcome::Failed;
    }
    let warned = header_get_all(headers, "warning")
        .iter()
        .any(|w| { let w = w.trim_start(); w.starts_with("110") || w.starts_with("111") });
    if warned {
        RevalidationOutcome::Failed
    } else {
        RevalidationOutcome::Success
    }
}

pub struct Revalidator {
    pending: Mutex<HashSet<String>>,
    failure_counts: Mutex<HashMap<String, u32>>,
    semaphore: Arc<Semaphore>,
    capacity: u32,
    queue_size: usize,
    shutting_down: AtomicBool,
}

impl Revalidator {
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        Self::with_queue_size(max_concurrent, usize::MAX)
    }

    /// `queue_size` bounds the number of distinct keys that may be pending
    /// at once, independent of `max_concurrent` (how many of those run at
    /// the same time). Corresponds to `CacheConfig::revalidation_queue_size`.
    pub fn with_queue_size(max_concurrent: usize, queue_size: usize) -> Arc<Self> {
        let capacity = max_concurrent.max(1) as u32;
        Arc::new(Self {
            pending: Mutex::new(HashSet::new()),
            failure_counts: Mutex::new(HashMap::new()),
            semaphore: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
            queue_size: queue_size.max(1),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.lock().unwrap().contains(key)
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        *self.failure_counts.lock().unwrap().get(key).unwrap_or(&0)
    }

    /// §4.14 `scheduleRevalidation`. Returns `false` without side effects
    /// when `key` is already pending, the revalidator is shutting down, or
    /// the concurrency limit is exhausted.
    pub fn schedule_revalidation<F, Fut>(self: &Arc<Self>, key: String, task: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = (u16, HeaderList)> + Send + 'static,
    {
        if self.shutting_down.load(Ordering::SeqCst) {
            return false;
        }

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        {
            let mut pending = self.pending.lock().unwrap();
            if pending.len() >= self.queue_size && !pending.contains(&key) {
                drop(permit);
                return false;
            }
            if !pending.insert(key.clone()) {
                drop(permit);
                return false;
            }
        }

        let delay = self.scheduling_delay(&key);
        let this = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            tokio::time::sleep(delay).await;
            let (status, headers) = task().await;
            this.on_complete(&key, classify_outcome(status, &headers));
        });
        true
    }

    fn scheduling_delay(&self, key: &str) -> Duration {
        let failures = self.failure_count(key).min(MAX_BACKOFF_SHIFT);
        let backoff = BASE_DELAY.saturating_mul(1 << failures);
        let capped = backoff.min(MAX_DELAY);
        let jitter_ms = rand::random::<u64>() % 250;
        capped + Duration::from_millis(jitter_ms)
    }

    fn on_complete(&self, key: &str, outcome: RevalidationOutcome) {
        self.pending.lock().unwrap().remove(key);
        match outcome {
            RevalidationOutcome::Success => {
                self.failure_counts.lock().unwrap().remove(key);
                debug!("revalidation succeeded for {key:?}");
            }
            RevalidationOutcome::Failed => {
                let mut counts = self.failure_counts.lock().unwrap();
                *counts.entry(key.to_string()).or_insert(0) += 1;
                warn!("revalidation failed for {key:?}, failure count now {}", counts[key]);
            }
        }
    }

    /// Refuses new tasks and waits up to `timeout` for every in-flight
    /// revalidation to finish. Returns `false` if the timeout elapses
    /// first; in-flight tasks are never cancelled (§5).
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutting_down.store(true, Ordering::SeqCst);
        matches!(
            tokio::time::timeout(timeout, self.semaphore.acquire_many(self.capacity)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_outcome_treats_5xx_as_failed() {
        assert_eq!(classify_outcome(503, &[]), RevalidationOutcome::Failed);
        assert_eq!(classify_outcome(200, &[]), RevalidationOutcome::Success);
    }

    #[test]
    fn classify_outcome_treats_stale_warnings_as_failed() {
        let headers = vec![("Warning".to_string(), "110 - \"stale\"".to_string())];
        assert_eq!(classify_outcome(200, &headers), RevalidationOutcome::Failed);
        let headers = vec![("Warning".to_string(), "111 - \"revalidation failed\"".to_string())];
        assert_eq!(classify_outcome(200, &headers), RevalidationOutcome::Failed);
    }

    #[tokio::test]
    async fn second_schedule_for_pending_key_is_a_noop() {
        let r = Revalidator::new(4);
        assert!(r.schedule_revalidation("k".to_string(), || async { (200, vec![]) }));
        assert!(r.is_pending("k"));
        assert!(!r.schedule_revalidation("k".to_string(), || async { (200, vec![]) }));
    }

    #[tokio::test]
    async fn successful_completion_clears_pending_and_failure_count() {
        let r = Revalidator::new(4);
        r.schedule_revalidation("k".to_string(), || async { (200, vec![]) });
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!r.is_pending("k"));
        assert_eq!(r.failure_count("k"), 0);
    }

    #[tokio::test]
    async fn failed_completion_increments_failure_count() {
        let r = Revalidator::new(4);
        r.schedule_revalidation("k".to_string(), || async { (503, vec![]) });
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!r.is_pending("k"));
        assert_eq!(r.failure_count("k"), 1);
    }

    #[tokio::test]
    async fn queue_size_bounds_distinct_pending_keys() {
        let r = Revalidator::with_queue_size(4, 2);
        assert!(r.schedule_revalidation("a".to_string(), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            (200, vec![])
        }));
        assert!(r.schedule_revalidation("b".to_string(), || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            (200, vec![])
        }));
        assert!(!r.schedule_revalidation("c".to_string(), || async { (200, vec![]) }));
    }

    #[tokio::test]
    async fn shutdown_refuses_new_schedules() {
        let r = Revalidator::new(4);
        assert!(r.shutdown(Duration::from_millis(50)).await);
        assert!(!r.schedule_revalidation("k".to_string(), || async { (200, vec![]) }));
    }
}
