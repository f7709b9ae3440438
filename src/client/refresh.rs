//! Single-flight coordination of token refreshes.
//!
//! The coordinator is either `Normal` or `Refreshing`. The first caller to find
//! it `Normal` becomes the leader and performs the refresh; everyone arriving
//! while it is `Refreshing` is queued as a waiter. When the leader settles, the
//! state goes back to `Normal` and the queue is drained in arrival order, each
//! waiter receiving the same outcome. At most one refresh is ever in flight.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use super::error::RefreshError;

type Outcome = Result<String, RefreshError>;

enum Phase {
    Normal,
    Refreshing {
        /// Distinguishes refreshes so that a leader whose refresh was abandoned
        /// by [`RefreshCoordinator::reset`] cannot settle a later one.
        generation: u64,
        waiters: Vec<oneshot::Sender<Outcome>>,
    },
}

struct Inner {
    phase: Phase,
    next_generation: u64,
}

/// Result of [`RefreshCoordinator::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub result: Outcome,
    /// `true` for the caller that actually performed the refresh.
    pub led: bool,
}

pub struct RefreshCoordinator {
    inner: Mutex<Inner>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Normal,
                next_generation: 0,
            }),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(self.lock().phase, Phase::Refreshing { .. })
    }

    /// Number of callers waiting on the in-flight refresh.
    pub fn queued(&self) -> usize {
        match &self.lock().phase {
            Phase::Normal => 0,
            Phase::Refreshing { waiters, .. } => waiters.len(),
        }
    }

    /// Joins the in-flight refresh, or performs `refresh` if none is running.
    ///
    /// `refresh` is only invoked by the leader. If the leader's future is
    /// dropped before it settles, the coordinator returns to `Normal` and the
    /// waiters receive [`RefreshError::Abandoned`].
    pub async fn run<F, Fut>(&self, refresh: F) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
    {
        self.run_committing(refresh, |_| {}).await
    }

    /// Like [`run`](Self::run), with `commit` applied to the leader's outcome
    /// before any waiter is released.
    ///
    /// `commit` runs under the coordinator's lock and only while the refresh is
    /// still current: after a [`reset`](Self::reset) it is skipped and the
    /// leader, like its waiters, gets [`RefreshError::Abandoned`].
    pub async fn run_committing<F, Fut, C>(&self, refresh: F, commit: C) -> RefreshOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome>,
        C: FnOnce(&Outcome),
    {
        match self.begin() {
            Ticket::Follower(receiver) => RefreshOutcome {
                result: receiver.await.unwrap_or(Err(RefreshError::Abandoned)),
                led: false,
            },
            Ticket::Leader(generation) => {
                let guard = LeaderGuard {
                    coordinator: self,
                    generation,
                    settled: false,
                };
                let result = refresh().await;
                let result = if guard.settle(&result, commit) {
                    result
                } else {
                    log::debug!("discarding outcome of a refresh that was reset");
                    Err(RefreshError::Abandoned)
                };
                RefreshOutcome { result, led: true }
            }
        }
    }

    /// Abandons the in-flight refresh, if any: its waiters are released with
    /// [`RefreshError::Abandoned`] and the state returns to `Normal`.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if let Phase::Refreshing { .. } = inner.phase {
            log::debug!("abandoning in-flight refresh");
            // Dropping the senders wakes every waiter with a receive error.
            inner.phase = Phase::Normal;
        }
    }

    fn begin(&self) -> Ticket {
        let mut inner = self.lock();
        match &mut inner.phase {
            Phase::Refreshing { waiters, .. } => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                log::debug!("refresh in flight, queued request #{}", waiters.len());
                Ticket::Follower(receiver)
            }
            Phase::Normal => {
                let generation = inner.next_generation;
                inner.next_generation += 1;
                inner.phase = Phase::Refreshing {
                    generation,
                    waiters: Vec::new(),
                };
                log::debug!("starting token refresh");
                Ticket::Leader(generation)
            }
        }
    }

    /// Returns `false` when `generation` is no longer the refresh in flight.
    fn settle<C: FnOnce(&Outcome)>(&self, generation: u64, outcome: &Outcome, commit: C) -> bool {
        let waiters = {
            let mut inner = self.lock();
            match &inner.phase {
                Phase::Refreshing { generation: current, .. } if *current == generation => {}
                _ => return false,
            }
            commit(outcome);
            match std::mem::replace(&mut inner.phase, Phase::Normal) {
                Phase::Refreshing { waiters, .. } => waiters,
                Phase::Normal => Vec::new(),
            }
        };

        log::debug!(
            "refresh settled ({}), releasing {} queued request(s)",
            if outcome.is_ok() { "ok" } else { "failed" },
            waiters.len()
        );
        for waiter in waiters {
            // A waiter whose request was dropped no longer listens.
            let _ = waiter.send(outcome.clone());
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Ticket {
    Leader(u64),
    Follower(oneshot::Receiver<Outcome>),
}

struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    generation: u64,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle<C: FnOnce(&Outcome)>(mut self, outcome: &Outcome, commit: C) -> bool {
        self.settled = true;
        self.coordinator.settle(self.generation, outcome, commit)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator
                .settle(self.generation, &Err(RefreshError::Abandoned), |_| {});
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Spawns `n` callers against a refresh that blocks until `release` fires.
    async fn contended(
        n: usize,
        outcome: Outcome,
    ) -> (Vec<RefreshOutcome>, usize) {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..n {
            let coordinator = coordinator.clone();
            let calls = calls.clone();
            let release = release.clone();
            let outcome = outcome.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .run(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        outcome
                    })
                    .await
            }));
        }

        while coordinator.queued() < n - 1 {
            tokio::task::yield_now().await;
        }
        release.notify_one();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        assert!(!coordinator.is_refreshing());
        (outcomes, calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        for n in [2, 5, 20] {
            let (outcomes, calls) = contended(n, Ok("new-token".into())).await;
            assert_eq!(calls, 1, "n = {}", n);
            assert_eq!(outcomes.iter().filter(|o| o.led).count(), 1);
            assert!(outcomes
                .iter()
                .all(|o| o.result.as_deref() == Ok("new-token")));
        }
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let (outcomes, calls) = contended(5, Err(RefreshError::Rejected(401))).await;
        assert_eq!(calls, 1);
        assert!(outcomes
            .iter()
            .all(|o| o.result == Err(RefreshError::Rejected(401))));
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_run() {
        let coordinator = RefreshCoordinator::new();
        let first = coordinator.run(|| async { Ok("a".to_string()) }).await;
        let second = coordinator.run(|| async { Ok("b".to_string()) }).await;
        assert!(first.led && second.led);
        assert_eq!(second.result.as_deref(), Ok("b"));
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .run(|| futures::future::pending::<Outcome>())
                    .await
            })
        };
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(|| async { Ok("unused".into()) }).await })
        };
        while coordinator.queued() < 1 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        let outcome = follower.await.unwrap();
        assert_eq!(outcome.result, Err(RefreshError::Abandoned));
        assert!(!outcome.led);
        assert!(!coordinator.is_refreshing());
    }

    /// Starts a leader on `coordinator` that yields `token` once `release` fires.
    fn gated_leader(
        coordinator: &Arc<RefreshCoordinator>,
        release: &Arc<Notify>,
        token: &'static str,
    ) -> tokio::task::JoinHandle<RefreshOutcome> {
        let coordinator = coordinator.clone();
        let release = release.clone();
        tokio::spawn(async move {
            coordinator
                .run(|| async move {
                    release.notified().await;
                    Ok(token.to_string())
                })
                .await
        })
    }

    fn follower(coordinator: &Arc<RefreshCoordinator>) -> tokio::task::JoinHandle<RefreshOutcome> {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run(|| async { Ok("unused".into()) }).await })
    }

    async fn wait_for_queue(coordinator: &RefreshCoordinator, len: usize) {
        while coordinator.queued() < len {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_reset_abandons_waiters() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let stale_release = Arc::new(Notify::new());
        let stale = gated_leader(&coordinator, &stale_release, "stale");
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }
        let abandoned = follower(&coordinator);
        wait_for_queue(&coordinator, 1).await;

        coordinator.reset();
        assert!(!coordinator.is_refreshing());
        assert_eq!(abandoned.await.unwrap().result, Err(RefreshError::Abandoned));

        // A second refresh starts while the first leader is still pending
        let fresh_release = Arc::new(Notify::new());
        let fresh = gated_leader(&coordinator, &fresh_release, "fresh");
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }
        let waiter = follower(&coordinator);
        wait_for_queue(&coordinator, 1).await;

        stale_release.notify_one();
        let stale = stale.await.unwrap();
        assert!(stale.led);
        assert_eq!(stale.result, Err(RefreshError::Abandoned));
        assert!(coordinator.is_refreshing());
        assert_eq!(coordinator.queued(), 1);

        fresh_release.notify_one();
        assert_eq!(fresh.await.unwrap().result.as_deref(), Ok("fresh"));
        let waiter = waiter.await.unwrap();
        assert!(!waiter.led);
        assert_eq!(waiter.result.as_deref(), Ok("fresh"));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_commit_skipped_after_reset() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let release = Arc::new(Notify::new());
        let committed = Arc::new(AtomicUsize::new(0));

        let leader = {
            let coordinator = coordinator.clone();
            let release = release.clone();
            let committed = committed.clone();
            tokio::spawn(async move {
                coordinator
                    .run_committing(
                        || async move {
                            release.notified().await;
                            Ok("late".to_string())
                        },
                        |_| {
                            committed.fetch_add(1, Ordering::SeqCst);
                        },
                    )
                    .await
            })
        };
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }

        coordinator.reset();
        release.notify_one();
        assert_eq!(leader.await.unwrap().result, Err(RefreshError::Abandoned));
        assert_eq!(committed.load(Ordering::SeqCst), 0);

        let outcome = coordinator
            .run_committing(
                || async { Ok("next".to_string()) },
                |outcome| {
                    assert_eq!(outcome.as_deref(), Ok("next"));
                    committed.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;
        assert_eq!(outcome.result.as_deref(), Ok("next"));
        assert_eq!(committed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_waiters_released_in_arrival_order() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        let release = Arc::new(Notify::new());
        let leader = gated_leader(&coordinator, &release, "ordered");
        while !coordinator.is_refreshing() {
            tokio::task::yield_now().await;
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for i in 0..6 {
            let waiter_coordinator = coordinator.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                let outcome = waiter_coordinator.run(|| async { Ok("unused".into()) }).await;
                order.lock().unwrap().push(i);
                outcome
            }));
            wait_for_queue(&coordinator, i + 1).await;
        }

        release.notify_one();
        leader.await.unwrap();
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().result.as_deref(), Ok("ordered"));
        }
        assert_eq!(*order.lock().unwrap(), (0..6).collect::<Vec<_>>());
    }
}
