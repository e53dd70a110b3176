
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Fixed-size set of worker tasks draining an unbounded FIFO queue.
///
/// Submitted units of work must not park a worker on open-ended waits; long
/// I/O belongs inside endpoints. The queue being unbounded trades memory for
/// never blocking a producer, so `submit` is safe to call from data callbacks.
pub struct WorkerPool {
    task_tx: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
    size: usize,
}

/// Worker count default: one per hardware thread, but never fewer than 4 so
/// a small host still overlaps drains with endpoint I/O.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .max(4)
}

impl WorkerPool {
    /// Spawns `size` workers (clamped to at least 1). Must run inside a tokio
    /// runtime.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
        let task_rx = Arc::new(AsyncMutex::new(task_rx));

        let workers = (0..size)
            .map(|_| {
                let task_rx = Arc::clone(&task_rx);
                tokio::spawn(async move {
                    loop {
                        // hold the queue lock only while waiting, never while
                        // running a task
                        let task = {
                            let mut rx = task_rx.lock().await;
                            rx.recv().await
                        };
                        match task {
                            Some(task) => task.await,
                            None => break,
                        }
                    }
                })
            })
            .collect();

        WorkerPool {
            task_tx: Mutex::new(Some(task_tx)),
            workers: AsyncMutex::new(workers),
            size,
        }
    }

    pub fn with_default_size() -> Self {
        Self::new(default_pool_size())
    }

    /// Enqueues a unit of work and returns immediately. After `shutdown` the
    /// task is dropped.
    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tx = self.task_tx.lock();
        if let Some(tx) = &*tx {
            if tx.send(Box::pin(task)).is_err() {
                log::debug!("worker pool queue closed, task dropped");
            }
        } else {
            log::debug!("worker pool shut down, task dropped");
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Closes the queue, lets the workers drain what is already enqueued and
    /// joins them. Idempotent.
    pub async fn shutdown(&self) {
        self.task_tx.lock().take();

        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
    }
}
