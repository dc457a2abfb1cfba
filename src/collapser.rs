//! C13 — single-flight request collapsing: N concurrent callers for the
//! same key produce one leader and N-1 followers; the leader's `complete()`
//! drains every non-cancelled follower exactly once (§4.13).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;

struct Waiter {
    cancelled: Arc<AtomicBool>,
    task: Box<dyn FnOnce() + Send>,
}

/// The shared state behind one in-flight key: a completion flag and the
/// queue of follower tasks waiting on it.
pub struct Shared {
    completed: AtomicBool,
    waiters: Mutex<Vec<Waiter>>,
}

impl Shared {
    fn new() -> Self {
        Self { completed: AtomicBool::new(false), waiters: Mutex::new(Vec::new()) }
    }

    fn await_completion(self: &Arc<Self>, task: Box<dyn FnOnce() + Send>) -> WaiterHandle {
        let mut waiters = self.waiters.lock().unwrap();
        // Checked under the lock so a `complete()` racing this call can't
        // drain the queue between our load and our push.
        if self.completed.load(Ordering::Acquire) {
            drop(waiters);
            task();
            return WaiterHandle { cancelled: Arc::new(AtomicBool::new(true)) };
        }
        let cancelled = Arc::new(AtomicBool::new(false));
        waiters.push(Waiter { cancelled: cancelled.clone(), task });
        WaiterHandle { cancelled }
    }

    fn complete(&self) {
        self.completed.store(true, Ordering::Release);
        let waiters = std::mem::take(&mut *self.waiters.lock().unwrap());
        for waiter in waiters {
            if !waiter.cancelled.load(Ordering::Acquire) {
                (waiter.task)();
            }
        }
    }
}

/// A handle over one queued waiter task. Cancellation only marks the
/// waiter inert — the leader always drains the queue regardless.
#[derive(Clone)]
pub struct WaiterHandle {
    cancelled: Arc<AtomicBool>,
}

impl WaiterHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Returned by [`Collapser::enter`]: exclusive leadership over a key, or a
/// handle to the entry an earlier leader already owns.
pub enum Entered {
    Leader(LeaderToken),
    Follower(Arc<Shared>),
}

/// Only the leader may call [`Collapser::complete`]; followers only ever
/// see `Arc<Shared>` via [`Entered::Follower`].
pub struct LeaderToken {
    key: String,
    shared: Arc<Shared>,
}

impl LeaderToken {
    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

/// A process-local, key-partitioned single-flight map.
pub struct Collapser {
    inflight: DashMap<String, Arc<Shared>>,
}

impl Default for Collapser {
    fn default() -> Self {
        Self::new()
    }
}

impl Collapser {
    pub fn new() -> Self {
        Self { inflight: DashMap::new() }
    }

    /// Inserts a fresh entry if `key` is absent, returning a leader token;
    /// otherwise returns the existing entry's follower handle.
    pub fn enter(&self, key: &str) -> Entered {
        match self.inflight.entry(key.to_string()) {
            MapEntry::Occupied(o) => Entered::Follower(o.get().clone()),
            MapEntry::Vacant(v) => {
                let shared = Arc::new(Shared::new());
                v.insert(shared.clone());
                Entered::Leader(LeaderToken { key: key.to_string(), shared })
            }
        }
    }

    /// Runs `task` immediately if `shared` is already completed, otherwise
    /// queues it to run from the leader's `complete()`.
    pub fn wait(&self, shared: &Arc<Shared>, task: impl FnOnce() + Send + 'static) -> WaiterHandle {
        shared.await_completion(Box::new(task))
    }

    /// Marks the entry completed and drains its waiter queue. Removes the
    /// map entry only if it still holds the exact `Shared` this leader
    /// inserted — a late-arriving new entry for the same key (after a prior
    /// `complete`) is never accidentally dropped.
    pub fn complete(&self, token: LeaderToken) {
        self.inflight.remove_if(&token.key, |_, v| Arc::ptr_eq(v, &token.shared));
        token.shared.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn second_enter_for_same_key_is_a_follower() {
        let c = Collapser::new();
        let first = c.enter("k");
        assert!(matches!(first, Entered::Leader(_)));
        let second = c.enter("k");
        assert!(matches!(second, Entered::Follower(_)));
    }

    #[test]
    fn complete_runs_every_waiter_exactly_once() {
        let c = Collapser::new();
        let Entered::Leader(leader) = c.enter("k") else { unreachable!() };
        let Entered::Follower(shared_a) = c.enter("k") else { unreachable!() };
        let Entered::Follower(shared_b) = c.enter("k") else { unreachable!() };

        let runs = Arc::new(AtomicUsize::new(0));
        let ra = runs.clone();
        let rb = runs.clone();
        c.wait(&shared_a, move || { ra.fetch_add(1, Ordering::SeqCst); });
        c.wait(&shared_b, move || { rb.fetch_add(1, Ordering::SeqCst); });

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        c.complete(leader);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cancelled_waiter_does_not_run() {
        let c = Collapser::new();
        let Entered::Leader(leader) = c.enter("k") else { unreachable!() };
        let Entered::Follower(shared) = c.enter("k") else { unreachable!() };

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let handle = c.wait(&shared, move || ran2.store(true, Ordering::SeqCst));
        handle.cancel();
        c.complete(leader);

        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn a_new_entry_after_complete_starts_a_fresh_leader() {
        let c = Collapser::new();
        let Entered::Leader(leader) = c.enter("k") else { unreachable!() };
        c.complete(leader);

        let after = c.enter("k");
        assert!(matches!(after, Entered::Leader(_)));
    }

    #[test]
    fn waiting_on_an_already_completed_entry_runs_immediately() {
        let c = Collapser::new();
        let Entered::Leader(leader) = c.enter("k") else { unreachable!() };
        c.complete(leader);

        // `shared` outlives removal from the map — a follower that entered
        // before `complete` but calls `wait` after it still gets its task
        // run right away rather than queued forever.
        let Entered::Leader(leader2) = c.enter("k") else { unreachable!() };
        let shared = leader2.shared().clone();
        shared.complete();

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        c.wait(&shared, move || ran2.store(true, Ordering::SeqCst));
        assert!(ran.load(Ordering::SeqCst));
    }
}
