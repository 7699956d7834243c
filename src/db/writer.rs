//! Buffered heartbeat ingress.
//!
//! Probe results are offered onto a bounded channel and drained by a single
//! writer task that batches inserts. When the channel is full the heartbeat is
//! dropped rather than blocking the scheduler.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use super::models::Heartbeat;
use super::store::Store;

pub const BUFFER_SIZE: usize = 1000;
pub const BATCH_SIZE: usize = 100;
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Handle to the single-writer heartbeat buffer.
pub struct HeartbeatWriter {
    tx: mpsc::Sender<Heartbeat>,
    done: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatWriter {
    /// Spawn the writer task draining into `store`.
    pub fn spawn(store: Arc<Store>) -> Self {
        let (tx, rx) = mpsc::channel(BUFFER_SIZE);
        let (done, done_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_writer(rx, done_rx, store));
        Self {
            tx,
            done,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Offer a heartbeat; drops and logs when the buffer is full.
    pub fn add_heartbeat(&self, h: Heartbeat) {
        match self.tx.try_send(h) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Heartbeat buffer full, dropping");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Heartbeat buffer closed, dropping");
            }
        }
    }

    /// Signal the writer to flush and exit, waiting a short grace period.
    pub async fn shutdown(&self) {
        let _ = self.done.send(());
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("Heartbeat writer did not drain within grace period");
            }
        }
    }
}

async fn run_writer(
    mut rx: mpsc::Receiver<Heartbeat>,
    mut done: broadcast::Receiver<()>,
    store: Arc<Store>,
) {
    let mut batch: Vec<Heartbeat> = Vec::with_capacity(BATCH_SIZE);
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(h) => {
                        batch.push(h);
                        if batch.len() >= BATCH_SIZE {
                            flush(&store, &mut batch);
                        }
                    }
                    None => {
                        flush(&store, &mut batch);
                        break;
                    }
                }
            }
            _ = interval.tick() => {
                flush(&store, &mut batch);
            }
            _ = done.recv() => {
                // Drain whatever is already queued, then final flush.
                while let Ok(h) = rx.try_recv() {
                    batch.push(h);
                }
                flush(&store, &mut batch);
                break;
            }
        }
    }
}

fn flush(store: &Store, batch: &mut Vec<Heartbeat>) {
    if batch.is_empty() {
        return;
    }
    // A failed flush is not retried; the aggregator stays correct with fewer samples.
    if let Err(e) = store.insert_heartbeats(batch) {
        tracing::error!("Failed to flush heartbeats: {}", e);
    }
    batch.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::STATUS_UP;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn beat(monitor_id: i64) -> Heartbeat {
        Heartbeat {
            id: 0,
            monitor_id,
            status: STATUS_UP,
            message: "ok".to_string(),
            time: Utc::now(),
            duration: 12,
        }
    }

    #[tokio::test]
    async fn test_writer_flushes_on_shutdown() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        let writer = HeartbeatWriter::spawn(store.clone());

        for _ in 0..5 {
            writer.add_heartbeat(beat(3));
        }
        writer.shutdown().await;

        let rows = store.recent_heartbeats(3, 10).unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[tokio::test]
    async fn test_writer_flushes_full_batch() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        let writer = HeartbeatWriter::spawn(store.clone());

        for _ in 0..BATCH_SIZE {
            writer.add_heartbeat(beat(4));
        }
        // A full batch flushes without waiting for the interval tick.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let rows = store.recent_heartbeats(4, BATCH_SIZE as i64 + 10).unwrap();
        assert_eq!(rows.len(), BATCH_SIZE);
        writer.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::open(tmp.path()).unwrap());
        let writer = HeartbeatWriter::spawn(store.clone());
        writer.shutdown().await;
        writer.shutdown().await;
    }
}
