//! Sink for replica counts observed on admitted Deployments.

use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(Clone, Debug)]
pub struct ReplicaSink {
    tx: mpsc::Sender<i32>,
}

impl ReplicaSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<i32>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ReplicaSink { tx }, rx)
    }

    /// Never blocks. Samples are dropped when the buffer is full or nobody
    /// is draining it.
    pub fn record(&self, replicas: i32) -> bool {
        match self.tx.try_send(replicas) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                tracing::debug!(replicas = n, "replica sink full, dropping sample");
                false
            }
            Err(TrySendError::Closed(n)) => {
                tracing::debug!(replicas = n, "replica sink closed, dropping sample");
                false
            }
        }
    }
}

/// Drains the sink into the log until every sender is gone.
pub async fn drain(mut rx: mpsc::Receiver<i32>) {
    while let Some(replicas) = rx.recv().await {
        tracing::info!(replicas, "observed deployment replicas");
    }
}
