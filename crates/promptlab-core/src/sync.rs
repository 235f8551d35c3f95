//! Opportunistic persistence of the matrix store.
//!
//! The bridge watches the store's revision counter, waits for edits to go
//! quiet for `debounce`, and hands a snapshot to a [`SnapshotStore`]. Failures
//! are logged and never reach the execution engine.

use crate::storage::snapshot::{fingerprint, SnapshotStore};
use crate::storage::MatrixStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

pub struct SyncBridge {
    store: MatrixStore,
    sink: Arc<dyn SnapshotStore>,
    debounce: Duration,
}

/// Running bridge. Call [`SyncHandle::shutdown`] to flush pending edits and stop.
pub struct SyncHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            tracing::warn!(event = "sync_task_join_failed", error = %e);
        }
    }
}

impl SyncBridge {
    pub fn new(store: MatrixStore, sink: Arc<dyn SnapshotStore>, debounce: Duration) -> Self {
        Self {
            store,
            sink,
            debounce,
        }
    }

    /// Replaces the store's contents with the latest snapshot, if there is one.
    pub async fn hydrate(&self) -> bool {
        match self.sink.load().await {
            Ok(Some(prompts)) => {
                tracing::info!(event = "snapshot_loaded", prompts = prompts.len());
                self.store.restore(prompts);
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(event = "snapshot_load_failed", error = %e);
                false
            }
        }
    }

    pub fn spawn(self) -> SyncHandle {
        let (tx, rx) = oneshot::channel();
        let changes = self.store.subscribe();
        let task = tokio::spawn(self.run(changes, rx));
        SyncHandle { shutdown: tx, task }
    }

    async fn run(self, mut changes: watch::Receiver<u64>, mut shutdown: oneshot::Receiver<()>) {
        let mut last_fp: Option<String> = None;

        'outer: loop {
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut shutdown => break,
            }

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.debounce) => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = &mut shutdown => break 'outer,
                }
            }

            changes.borrow_and_update();
            self.flush(&mut last_fp).await;
        }

        self.flush(&mut last_fp).await;
        tracing::debug!(event = "sync_stopped");
    }

    /// Persists the current state unless it matches the last persisted one.
    async fn flush(&self, last_fp: &mut Option<String>) -> bool {
        let prompts = self.store.prompts();
        let payload = match serde_json::to_string(&prompts) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(event = "snapshot_encode_failed", error = %e);
                return false;
            }
        };
        let fp = fingerprint(&payload);
        if last_fp.as_deref() == Some(fp.as_str()) {
            tracing::debug!(event = "snapshot_unchanged");
            return false;
        }

        match self.sink.persist(&prompts).await {
            Ok(()) => {
                tracing::info!(event = "snapshot_persisted", prompts = prompts.len());
                *last_fp = Some(fp);
                true
            }
            Err(e) => {
                tracing::warn!(event = "snapshot_persist_failed", error = %e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Prompt;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemorySink {
        saved: Mutex<Vec<Vec<Prompt>>>,
        fail: bool,
    }

    impl MemorySink {
        fn saved(&self) -> Vec<Vec<Prompt>> {
            self.saved.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotStore for MemorySink {
        async fn persist(&self, prompts: &[Prompt]) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.saved.lock().unwrap().push(prompts.to_vec());
            Ok(())
        }

        async fn load(&self) -> anyhow::Result<Option<Vec<Prompt>>> {
            Ok(self.saved.lock().unwrap().last().cloned())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_are_debounced_into_one_write() {
        let store = MatrixStore::new(vec!["m".into()]);
        let sink = Arc::new(MemorySink::default());
        let handle = SyncBridge::new(store.clone(), sink.clone(), Duration::from_millis(100)).spawn();

        let pid = store.create_prompt("p");
        store.add_input_row(&pid, "a");
        store.add_input_row(&pid, "b");
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(sink.saved().len(), 1);
        assert_eq!(sink.saved()[0], store.prompts());

        handle.shutdown().await;
        assert_eq!(sink.saved().len(), 1, "unchanged state is not rewritten");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_pending_edits() {
        let store = MatrixStore::new(vec!["m".into()]);
        let sink = Arc::new(MemorySink::default());
        let handle = SyncBridge::new(store.clone(), sink.clone(), Duration::from_secs(60)).spawn();

        store.create_prompt("p");
        tokio::task::yield_now().await;
        handle.shutdown().await;

        assert_eq!(sink.saved().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persist_failures_are_swallowed() {
        let store = MatrixStore::new(vec!["m".into()]);
        let sink = Arc::new(MemorySink {
            fail: true,
            ..Default::default()
        });
        let handle = SyncBridge::new(store.clone(), sink.clone(), Duration::from_millis(10)).spawn();

        store.create_prompt("p");
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown().await;
        assert!(sink.saved().is_empty());
    }

    #[tokio::test]
    async fn hydrate_restores_latest_snapshot() {
        let source = MatrixStore::new(vec!["m".into()]);
        let pid = source.create_prompt("saved");
        let sink = Arc::new(MemorySink::default());
        sink.persist(&source.prompts()).await.unwrap();

        let target = MatrixStore::new(vec!["m".into()]);
        let bridge = SyncBridge::new(target.clone(), sink, DEFAULT_DEBOUNCE);
        assert!(bridge.hydrate().await);
        assert_eq!(target.active().map(|(p, _)| p), Some(pid));
    }
}
