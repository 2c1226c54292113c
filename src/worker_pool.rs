//! Bounded pool of tokio workers executing boxed tasks
//!
//! The pool size bounds how many activations run at once, not how many
//! tasks exist: a task that wants to run again re-submits itself and waits
//! in the queue without occupying a worker.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A unit of work executed by the [`WorkerPool`]
#[async_trait]
pub trait PoolTask: Send + 'static {
    /// Run one activation; the task is consumed and may re-submit itself
    async fn run(self: Box<Self>);
}

type Queue = mpsc::UnboundedReceiver<Box<dyn PoolTask>>;

struct PoolInner {
    tx: mpsc::UnboundedSender<Box<dyn PoolTask>>,
    queued: Arc<AtomicUsize>,
    token: CancellationToken,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Fixed-size worker pool with a non-blocking, unbounded submission queue
///
/// Cheap to clone; all clones submit to the same queue.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.inner.workers)
            .field("queued", &self.queue_depth())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `workers` worker tasks on the current tokio runtime
    ///
    /// A value of 0 is treated as 1.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let queued = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let handles = (0..workers)
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    rx.clone(),
                    queued.clone(),
                    token.clone(),
                ))
            })
            .collect();

        tracing::debug!(workers, "Worker pool started");

        Self {
            inner: Arc::new(PoolInner {
                tx,
                queued,
                token,
                workers,
                handles: Mutex::new(handles),
            }),
        }
    }

    /// Number of worker tasks
    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Tasks waiting in the queue (not counting those currently running)
    pub fn queue_depth(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Whether [`WorkerPool::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Enqueue a task; never blocks
    ///
    /// Returns false if the pool is shut down, in which case the task is
    /// dropped without running.
    pub fn submit(&self, task: Box<dyn PoolTask>) -> bool {
        if self.is_shut_down() {
            tracing::debug!("Worker pool shut down, dropping submitted task");
            return false;
        }
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if self.inner.tx.send(task).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::debug!("Worker pool queue closed, dropping submitted task");
            return false;
        }
        true
    }

    /// Enqueue a task once `delay` has elapsed, without occupying a worker meanwhile
    ///
    /// Returns false if the pool is already shut down. A task whose delay is
    /// still running when the pool shuts down is dropped.
    pub fn submit_after(&self, delay: Duration, task: Box<dyn PoolTask>) -> bool {
        if delay.is_zero() {
            return self.submit(task);
        }
        if self.is_shut_down() {
            tracing::debug!("Worker pool shut down, dropping delayed task");
            return false;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = pool.inner.token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = pool.submit(task);
                }
            }
        });
        true
    }

    /// Stop all workers; queued tasks are dropped without running
    pub async fn shutdown(&self) {
        self.inner.token.cancel();
        let handles = std::mem::take(&mut *self.inner.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Worker task ended abnormally");
            }
        }
        tracing::debug!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<Queue>>,
    queued: Arc<AtomicUsize>,
    token: CancellationToken,
) {
    loop {
        let task = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            task = async { rx.lock().await.recv().await } => task,
        };
        let Some(task) = task else { break };
        queued.fetch_sub(1, Ordering::SeqCst);

        if AssertUnwindSafe(task.run()).catch_unwind().await.is_err() {
            tracing::error!(worker, "Pool task panicked");
        }
    }

    // Queued tasks hold pool handles; drop them so the pool can be freed.
    if let Ok(mut queue) = rx.try_lock() {
        queue.close();
        while queue.try_recv().is_ok() {
            queued.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    struct Countdown {
        remaining: usize,
        pool: WorkerPool,
        runs: Arc<AtomicUsize>,
        done: Option<oneshot::Sender<()>>,
    }

    #[async_trait]
    impl PoolTask for Countdown {
        async fn run(mut self: Box<Self>) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.remaining == 0 {
                if let Some(done) = self.done.take() {
                    let _ = done.send(());
                }
                return;
            }
            self.remaining -= 1;
            let pool = self.pool.clone();
            pool.submit(self);
        }
    }

    struct Panics;

    #[async_trait]
    impl PoolTask for Panics {
        async fn run(self: Box<Self>) {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn self_resubmitting_task_runs_to_completion() {
        let pool = WorkerPool::new(2);
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        pool.submit(Box::new(Countdown {
            remaining: 50,
            pool: pool.clone(),
            runs: runs.clone(),
            done: Some(tx),
        }));

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 51);
        assert_eq!(pool.queue_depth(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn worker_survives_a_panicking_task() {
        let pool = WorkerPool::new(1);
        pool.submit(Box::new(Panics));

        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();
        pool.submit(Box::new(Countdown {
            remaining: 0,
            pool: pool.clone(),
            runs: runs.clone(),
            done: Some(tx),
        }));

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_waits_for_the_delay() {
        let pool = WorkerPool::new(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = oneshot::channel();

        pool.submit_after(
            Duration::from_millis(500),
            Box::new(Countdown {
                remaining: 0,
                pool: pool.clone(),
                runs: runs.clone(),
                done: Some(tx),
            }),
        );

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped() {
        let pool = WorkerPool::new(1);
        pool.shutdown().await;
        assert!(pool.is_shut_down());

        let runs = Arc::new(AtomicUsize::new(0));
        let accepted = pool.submit(Box::new(Countdown {
            remaining: 0,
            pool: pool.clone(),
            runs: runs.clone(),
            done: None,
        }));
        assert!(!accepted);
        assert_eq!(pool.queue_depth(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
