//! Strictly serial, time-boxed lane for outbound control frames.
//!
//! Tasks run one at a time in submission order. Each task gets at most
//! `task_timeout` of the lane; a task that overruns keeps running in the
//! background but no longer blocks the tasks queued behind it.
//!
//! A queue lives as long as one transport link. [`SendQueue::end`] (or drop)
//! stops the worker and discards tasks that have not started.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A boxed unit of outbound work.
pub type SendTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Owner of the worker task.
pub struct SendQueue {
    label: String,
    handle: SendQueueHandle,
    worker: tokio::task::JoinHandle<()>,
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct SendQueueHandle {
    tx: mpsc::UnboundedSender<SendTask>,
}

impl SendQueueHandle {
    /// Submit a task. Returns `false` if the queue has ended.
    pub fn push<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx.send(Box::pin(task)).is_ok()
    }
}

impl SendQueue {
    /// Spawn the worker. Must be called within a Tokio runtime.
    pub fn start(label: impl Into<String>, task_timeout: Duration) -> Self {
        let label = label.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_queue(label.clone(), rx, task_timeout));
        Self { label, handle: SendQueueHandle { tx }, worker }
    }

    pub fn handle(&self) -> SendQueueHandle {
        self.handle.clone()
    }

    pub fn push<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.push(task)
    }

    /// Stop the worker; queued tasks that have not started are dropped.
    pub fn end(self) {
        debug!("[{}] send queue ended", self.label);
    }
}

impl Drop for SendQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_queue(
    label: String,
    mut rx: mpsc::UnboundedReceiver<SendTask>,
    task_timeout: Duration,
) {
    while let Some(task) = rx.recv().await {
        // Spawned so an overrunning task is detached rather than cancelled.
        let running = tokio::spawn(task);
        match tokio::time::timeout(task_timeout, running).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("[{label}] send task failed: {e}"),
            Err(_) => warn!("[{label}] send task exceeded {task_timeout:?}, continuing"),
        }
    }
}
