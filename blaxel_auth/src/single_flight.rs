//! Coalescing of concurrent calls onto a single in-flight future
//!
//! A [`SingleFlight`] holds at most one running future at a time. Callers that
//! arrive while it is running join it and observe the same result, including
//! the same error. The check for a running future and the installation of a
//! new one happen under one lock, so two callers can never both start work.

use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::future::{BoxFuture, FutureExt, Shared};

/// A handle to an in-flight call that any number of callers may await
pub type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

type Slot<T, E> = Arc<Mutex<Option<Flight<T, E>>>>;

/// Deduplicates concurrent invocations of an asynchronous operation
pub struct SingleFlight<T, E> {
    slot: Slot<T, E>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T, E> fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &lock(&self.slot).is_some())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Constructs an idle single-flight group
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a call is currently running
    pub fn is_in_flight(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// The running call, if any
    pub fn current(&self) -> Option<Flight<T, E>> {
        lock(&self.slot).clone()
    }

    /// Joins the running call, or starts one if `should_start` agrees
    ///
    /// Returns `None` when nothing is running and `should_start` declined.
    /// `should_start` and `start` run while the group's lock is held, so
    /// neither may block or re-enter this group. `start` should only build
    /// the future; the work happens when the returned flight is polled.
    pub fn join_or_start<P, F, Fut>(&self, should_start: P, start: F) -> Option<Flight<T, E>>
    where
        P: FnOnce() -> bool,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let mut slot = lock(&self.slot);

        if let Some(flight) = slot.as_ref() {
            return Some(flight.clone());
        }

        if !should_start() {
            return None;
        }

        Some(self.install(&mut slot, start))
    }

    /// Joins the running call or starts a new one, then awaits its result
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut slot = lock(&self.slot);
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => self.install(&mut slot, start),
            }
        };

        flight.await
    }

    fn install<F, Fut>(&self, slot: &mut Option<Flight<T, E>>, start: F) -> Flight<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let work = start();
        let release = Arc::downgrade(&self.slot);
        let flight = async move {
            let result = work.await;
            if let Some(slot) = release.upgrade() {
                lock(&slot).take();
            }
            result
        }
        .boxed()
        .shared();

        *slot = Some(flight.clone());
        flight
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;
    use tokio::sync::Notify;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let group = SingleFlight::<u32, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let callers = join_all((0..8).map(|_| {
            let calls = calls.clone();
            let gate = gate.clone();
            group.run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok(42)
            })
        }));

        let open = async {
            assert!(group.is_in_flight());
            gate.notify_one();
        };

        let (results, ()) = futures::join!(callers, open);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r == &Ok(42)));
        assert!(!group.is_in_flight());
    }

    #[tokio::test]
    async fn errors_are_delivered_to_every_caller() {
        let group = SingleFlight::<(), String>::new();

        let first = group.run(|| async {
            tokio::task::yield_now().await;
            Err("denied".to_owned())
        });
        let second = group.run(|| async { Ok(()) });

        let (first, second) = futures::join!(first, second);

        assert_eq!(first, Err("denied".to_owned()));
        assert_eq!(second, Err("denied".to_owned()));
    }

    #[tokio::test]
    async fn a_new_call_starts_after_the_previous_one_settles() {
        let group = SingleFlight::<u32, ()>::new();

        assert_eq!(group.run(|| async { Ok(1) }).await, Ok(1));
        assert_eq!(group.run(|| async { Ok(2) }).await, Ok(2));
    }

    #[test]
    fn declined_start_leaves_group_idle() {
        let group = SingleFlight::<(), ()>::new();
        let flight = group.join_or_start(|| false, || async { Ok(()) });

        assert!(flight.is_none());
        assert!(!group.is_in_flight());
    }

    #[tokio::test]
    async fn running_call_is_joined_even_when_start_is_declined() {
        let group = SingleFlight::<u32, ()>::new();
        let started = group
            .join_or_start(|| true, || async { Ok(7) })
            .unwrap();

        let joined = group
            .join_or_start(|| false, || async { Ok(0) })
            .expect("running call should be joined");

        assert_eq!(joined.await, Ok(7));
        assert_eq!(started.await, Ok(7));
    }
}
