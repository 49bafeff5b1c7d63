//! The asynchronous job boundary.
//!
//! `enqueue` / worker-side consumption over an abstract trait; no specific
//! broker is mandated. The in-memory implementation rides on an unbounded
//! tokio channel, with delayed delivery (publish retries) handled by a
//! spawned sleep-then-send task. Everything a job needs beyond its row id
//! lives in the database, so payloads stay tiny and serializable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// A publish job. Payloads carry row ids only; workers re-read state from
/// the database when the job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    PublishSingle { post_id: i64 },
    PublishCarousel { group_id: i64 },
}

#[derive(Debug, Error)]
pub enum QueueError {
    /// The consumer side is gone; the process is shutting down.
    #[error("job queue is closed")]
    Closed,
}

/// Abstract asynchronous dispatch boundary.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job for immediate consumption.
    async fn enqueue(&self, job: Job) -> Result<(), QueueError>;

    /// Enqueue a job to become consumable after `delay` (retry backoff).
    async fn enqueue_after(&self, job: Job, delay: Duration) -> Result<(), QueueError>;
}

/// In-process queue over an unbounded tokio mpsc channel.
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl InMemoryQueue {
    /// Creates the queue and its single consumer stream.
    #[must_use]
    pub fn new() -> (Arc<Self>, JobStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), JobStream { rx })
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job: Job) -> Result<(), QueueError> {
        self.tx.send(job).map_err(|_| QueueError::Closed)
    }

    async fn enqueue_after(&self, job: Job, delay: Duration) -> Result<(), QueueError> {
        if self.tx.is_closed() {
            return Err(QueueError::Closed);
        }
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                tracing::warn!(?job, "delayed job dropped: queue closed before delivery");
            }
        });
        Ok(())
    }
}

/// Consumer side of an [`InMemoryQueue`]; owned by the worker pool runner.
pub struct JobStream {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl JobStream {
    /// Next job, or `None` once every producer handle is dropped.
    pub async fn recv(&mut self) -> Option<Job> {
        self.rx.recv().await
    }
}
