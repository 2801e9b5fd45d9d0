//! Serialized work queue for media-transport mutations.
//!
//! SDP-style renegotiation is not safe to run concurrently: interleaved
//! offer/answer cycles corrupt the negotiation state. Every mutation that
//! touches a session's transport (track changes, offer/answer application,
//! candidate application) goes through one [`SerialWorkQueue`], whose worker
//! executes a single task to full completion, including every await inside
//! it, before receiving the next. Failure of one task never halts the
//! worker; the next queued task still runs.
//!
//! There is no priority and no cancellation: a pushed task cannot be
//! withdrawn. Closing the queue stops intake; whatever is already queued
//! drains in order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, warn};

/// Executes queued task payloads, one at a time.
#[async_trait]
pub trait TaskExecutor<T, E>: Send + 'static {
    async fn execute(&mut self, task: T) -> Result<(), E>;
}

/// The queue no longer accepts tasks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("work queue is closed")]
pub struct QueueClosed;

struct QueueItem<T, E> {
    task: T,
    done: Option<oneshot::Sender<Result<(), E>>>,
}

/// Handle to a spawned single-consumer task queue.
///
/// Cloning the handle is cheap; all clones feed the same worker.
pub struct SerialWorkQueue<T, E> {
    name: String,
    sender: Arc<RwLock<Option<mpsc::UnboundedSender<QueueItem<T, E>>>>>,
}

// Manual impl: the handle is clonable regardless of whether the task
// payload is.
impl<T, E> Clone for SerialWorkQueue<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T, E> SerialWorkQueue<T, E>
where
    T: Send + 'static,
    E: Send + fmt::Display + 'static,
{
    /// Spawn the worker loop and return the queue handle.
    pub fn spawn<X>(name: impl Into<String>, mut executor: X) -> Self
    where
        X: TaskExecutor<T, E>,
    {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem<T, E>>();

        let worker_name = name.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let result = executor.execute(item.task).await;
                if let Err(error) = &result {
                    warn!("task on queue {} failed: {}", worker_name, error);
                }
                if let Some(done) = item.done {
                    // Receiver may have been dropped; completion is best-effort.
                    let _ = done.send(result);
                }
            }
            debug!("work queue {} drained", worker_name);
        });

        Self {
            name,
            sender: Arc::new(RwLock::new(Some(tx))),
        }
    }

    /// Append a task without waiting for its completion.
    pub async fn push(&self, task: T) -> Result<(), QueueClosed> {
        let guard = self.sender.read().await;
        let sender = guard.as_ref().ok_or(QueueClosed)?;
        sender
            .send(QueueItem { task, done: None })
            .map_err(|_| QueueClosed)
    }

    /// Append a task and obtain a receiver that resolves once the task (and
    /// its entire internal asynchronous chain) has completed.
    pub async fn push_awaited(
        &self,
        task: T,
    ) -> Result<oneshot::Receiver<Result<(), E>>, QueueClosed> {
        let (done_tx, done_rx) = oneshot::channel();
        let guard = self.sender.read().await;
        let sender = guard.as_ref().ok_or(QueueClosed)?;
        sender
            .send(QueueItem {
                task,
                done: Some(done_tx),
            })
            .map_err(|_| QueueClosed)?;
        Ok(done_rx)
    }

    /// Stop accepting tasks. Queued tasks still drain in order, and an
    /// in-flight task runs to completion.
    pub async fn close(&self) {
        let mut guard = self.sender.write().await;
        if guard.take().is_some() {
            debug!("closed work queue {}", self.name);
        }
    }

    /// True once [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.sender.read().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;

    use super::*;

    struct StepTask {
        label: &'static str,
        delay: Duration,
        fail: bool,
    }

    struct RecordingExecutor {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl TaskExecutor<StepTask, String> for RecordingExecutor {
        async fn execute(&mut self, task: StepTask) -> Result<(), String> {
            self.log.lock().await.push(format!("{}:start", task.label));
            // Several awaits inside one task; the next task must not start
            // until all of them have completed.
            tokio::time::sleep(task.delay).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.log.lock().await.push(format!("{}:end", task.label));
            if task.fail {
                Err(format!("{} failed", task.label))
            } else {
                Ok(())
            }
        }
    }

    fn queue_with_log() -> (SerialWorkQueue<StepTask, String>, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let queue = SerialWorkQueue::spawn("test", RecordingExecutor { log: log.clone() });
        (queue, log)
    }

    #[tokio::test]
    async fn tasks_run_in_fifo_order_to_full_completion() {
        let (queue, log) = queue_with_log();

        // The first task sleeps longest; without serialization the second
        // task's effects would appear before the first one finishes.
        queue
            .push(StepTask { label: "t1", delay: Duration::from_millis(30), fail: false })
            .await
            .expect("push t1");
        queue
            .push(StepTask { label: "t2", delay: Duration::from_millis(5), fail: false })
            .await
            .expect("push t2");
        let done = queue
            .push_awaited(StepTask { label: "t3", delay: Duration::from_millis(1), fail: false })
            .await
            .expect("push t3");

        done.await.expect("completion channel").expect("t3 ok");

        let log = log.lock().await;
        assert_eq!(
            *log,
            vec!["t1:start", "t1:end", "t2:start", "t2:end", "t3:start", "t3:end"]
        );
    }

    #[tokio::test]
    async fn failure_is_reported_and_does_not_halt_the_queue() {
        let (queue, log) = queue_with_log();

        let failed = queue
            .push_awaited(StepTask { label: "bad", delay: Duration::from_millis(1), fail: true })
            .await
            .expect("push bad");
        let ok = queue
            .push_awaited(StepTask { label: "good", delay: Duration::from_millis(1), fail: false })
            .await
            .expect("push good");

        assert_eq!(failed.await.expect("channel"), Err("bad failed".to_string()));
        assert_eq!(ok.await.expect("channel"), Ok(()));

        let log = log.lock().await;
        assert_eq!(*log, vec!["bad:start", "bad:end", "good:start", "good:end"]);
    }

    #[tokio::test]
    async fn close_rejects_new_tasks_but_drains_queued_ones() {
        let (queue, log) = queue_with_log();

        let done = queue
            .push_awaited(StepTask { label: "t1", delay: Duration::from_millis(10), fail: false })
            .await
            .expect("push t1");
        queue.close().await;
        assert!(queue.is_closed().await);

        let rejected = queue
            .push(StepTask { label: "late", delay: Duration::ZERO, fail: false })
            .await;
        assert_eq!(rejected, Err(QueueClosed));

        done.await.expect("channel").expect("t1 ok");
        assert_eq!(*log.lock().await, vec!["t1:start", "t1:end"]);
    }
}
