//! Bounded worker pool with one in-flight execution per cache key.

use audiograb_cache::CacheKey;
use audiograb_core::FetchError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

type FlightFuture<T> = Shared<BoxFuture<'static, Result<T, FetchError>>>;
type Job = BoxFuture<'static, ()>;
type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>;

/// Runs work on a fixed number of workers, collapsing concurrent requests
/// for the same key onto a single execution.
///
/// Executions are queued in the order `dispatch` is called and started in
/// that order as workers free up. Each execution runs in its own task, so a
/// caller that stops waiting never cancels work that other callers have
/// joined.
pub struct SingleFlightDispatcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    in_flight: Arc<DashMap<CacheKey, FlightFuture<T>>>,
    queue: mpsc::UnboundedSender<Job>,
    // Handed to the workers on first dispatch
    pending_workers: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    busy: Arc<AtomicUsize>,
    pool_size: usize,
}

impl<T> SingleFlightDispatcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(pool_size: usize) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        Self {
            in_flight: Arc::new(DashMap::new()),
            queue,
            pending_workers: Mutex::new(Some(receiver)),
            busy: Arc::new(AtomicUsize::new(0)),
            pool_size: pool_size.max(1),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of keys with an execution queued or running
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Idle worker slots
    pub fn available_workers(&self) -> usize {
        self.pool_size.saturating_sub(self.busy.load(Ordering::SeqCst))
    }

    /// Run `work` for `key`, or join the execution already in flight for it.
    ///
    /// Every caller attached to one execution receives a clone of the same
    /// result. The key is released as soon as the execution finishes,
    /// whatever its outcome, so a later call starts a fresh execution.
    pub async fn dispatch<F, Fut>(&self, key: CacheKey, work: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        self.start_workers();

        let flight = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(%key, "joining in-flight fetch");
                existing.get().clone()
            }
            Entry::Vacant(slot) => {
                let (done, result) = oneshot::channel();
                let job = self.job(key.clone(), work, done);
                if self.queue.send(job).is_err() {
                    return Err(FetchError::WorkerLost {
                        message: "worker pool is shut down".to_string(),
                    });
                }

                let flight = async move {
                    result.await.unwrap_or_else(|_| {
                        Err(FetchError::WorkerLost {
                            message: "execution ended without a result".to_string(),
                        })
                    })
                }
                .boxed()
                .shared();

                slot.insert(flight.clone());
                flight
            }
        };

        flight.await
    }

    fn job<F, Fut>(
        &self,
        key: CacheKey,
        work: F,
        done: oneshot::Sender<Result<T, FetchError>>,
    ) -> Job
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let busy = Arc::clone(&self.busy);
        async move {
            busy.fetch_add(1, Ordering::SeqCst);
            // A panicking execution surfaces as a JoinError instead of
            // taking the worker down with it
            let result = tokio::spawn(async move { work().await })
                .await
                .unwrap_or_else(|e| {
                    Err(FetchError::WorkerLost {
                        message: e.to_string(),
                    })
                });
            in_flight.remove(&key);
            busy.fetch_sub(1, Ordering::SeqCst);
            let _ = done.send(result);
        }
        .boxed()
    }

    fn start_workers(&self) {
        let Some(receiver) = self.pending_workers.lock().take() else {
            return;
        };
        let jobs: JobQueue = Arc::new(tokio::sync::Mutex::new(receiver));
        for worker in 0..self.pool_size {
            let jobs = Arc::clone(&jobs);
            tokio::spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    match next {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                tracing::trace!(worker, "fetch worker stopped");
            });
        }
        tracing::debug!(workers = self.pool_size, "fetch workers started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiograb_cache::compute_key;
    use audiograb_core::Owner;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn key(url: &str) -> CacheKey {
        compute_key(url, &Owner::Shared)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_key_runs_once() {
        let dispatcher = Arc::new(SingleFlightDispatcher::<String>::new(4));
        let runs = Arc::new(AtomicUsize::new(0));

        let calls = (0..8).map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let runs = Arc::clone(&runs);
            async move {
                dispatcher
                    .dispatch(key("https://youtu.be/same"), move || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("song.mp3".to_string())
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_deref() == Ok("song.mp3")));
        assert_eq!(dispatcher.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn failures_are_shared_too() {
        let dispatcher = SingleFlightDispatcher::<String>::new(2);
        let runs = Arc::new(AtomicUsize::new(0));

        let make = || {
            let runs = Arc::clone(&runs);
            move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(FetchError::tool_failure("yt-dlp", Some(1), "blocked"))
            }
        };

        let (a, b) = tokio::join!(
            dispatcher.dispatch(key("https://youtu.be/x"), make()),
            dispatcher.dispatch(key("https://youtu.be/x"), make()),
        );

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
        assert_eq!(a.unwrap_err().kind(), "tool_failure");
    }

    #[tokio::test]
    async fn key_is_released_after_completion() {
        let dispatcher = SingleFlightDispatcher::<u32>::new(1);
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            let result = dispatcher
                .dispatch(key("https://youtu.be/x"), move || async move {
                    Ok(runs.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await;
            assert!(result.is_ok());
            assert_eq!(dispatcher.in_flight_count(), 0);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_pool_size() {
        let dispatcher = Arc::new(SingleFlightDispatcher::<()>::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..6).map(|i| {
            let dispatcher = Arc::clone(&dispatcher);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            async move {
                dispatcher
                    .dispatch(key(&format!("https://youtu.be/{i}")), move || async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }
        });
        let results = join_all(calls).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.available_workers(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn queued_work_starts_in_submission_order() {
        let dispatcher = Arc::new(SingleFlightDispatcher::<()>::new(1));
        let started = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (release, released) = oneshot::channel::<()>();

        let blocker = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .dispatch(key("https://youtu.be/blocker"), move || async move {
                        let _ = released.await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.available_workers(), 0);

        let queued = {
            let dispatcher = Arc::clone(&dispatcher);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                let calls = (0..5).map(|i| {
                    let dispatcher = Arc::clone(&dispatcher);
                    let started = Arc::clone(&started);
                    async move {
                        dispatcher
                            .dispatch(key(&format!("https://youtu.be/{i}")), move || async move {
                                started.lock().push(i);
                                Ok(())
                            })
                            .await
                    }
                });
                join_all(calls).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(dispatcher.in_flight_count(), 6);

        release.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        let results = queued.await.unwrap();

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(*started.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn panicking_work_is_worker_lost_and_releases_the_key() {
        let dispatcher = SingleFlightDispatcher::<()>::new(1);

        let result = dispatcher
            .dispatch(key("https://youtu.be/x"), || async {
                let broken = true;
                if broken {
                    panic!("tool wrapper bug");
                }
                Ok(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), "worker_lost");
        assert_eq!(dispatcher.in_flight_count(), 0);
        let again = dispatcher
            .dispatch(key("https://youtu.be/x"), || async { Ok(()) })
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_cancel_shared_work() {
        let dispatcher = SingleFlightDispatcher::<&'static str>::new(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let make = || {
            let runs = Arc::clone(&runs);
            move || async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                runs.fetch_add(1, Ordering::SeqCst);
                Ok("done")
            }
        };

        let impatient = tokio::time::timeout(
            Duration::from_millis(10),
            dispatcher.dispatch(key("https://youtu.be/x"), make()),
        )
        .await;
        assert!(impatient.is_err());

        let patient = dispatcher.dispatch(key("https://youtu.be/x"), make()).await;
        assert_eq!(patient, Ok("done"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
