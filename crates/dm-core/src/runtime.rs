use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::CoreConfig;
use crate::expiration::{Clock, ExpirationScheduler, SystemClock};
use crate::store::{KvBackend, MessageStore, SqliteKv};

/// Composition root: owns the message store, the expiration scheduler and the
/// debounced flush task. Dependents receive the store via `store()`; nothing
/// here is a global.
pub struct CoreRuntime {
    config: CoreConfig,
    store: Arc<MessageStore>,
    scheduler: ExpirationScheduler,
    cancel_tx: watch::Sender<bool>,
    flush_task: Option<JoinHandle<()>>,
    hydration_task: Option<JoinHandle<()>>,
}

impl CoreRuntime {
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CoreConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = if config.persist {
            let path = config.database_path();
            let backend = SqliteKv::open(&path)
                .with_context(|| format!("failed to open message database at {}", path.display()))?;
            Arc::new(MessageStore::new(Arc::new(backend) as Arc<dyn KvBackend>))
        } else {
            Arc::new(MessageStore::in_memory())
        };

        let scheduler = ExpirationScheduler::with_clock(store.clone(), clock);
        let (cancel_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            store,
            scheduler,
            cancel_tx,
            flush_task: None,
            hydration_task: None,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<MessageStore> {
        self.store.clone()
    }

    pub fn scheduler(&self) -> &ExpirationScheduler {
        &self.scheduler
    }

    /// Spawn hydration, the flush task and the expiration scheduler.
    /// Must be called from within a tokio runtime. Idempotent.
    pub fn start(&mut self) {
        if self.hydration_task.is_none() {
            let store = self.store.clone();
            self.hydration_task = Some(tokio::task::spawn_blocking(move || {
                if let Err(e) = store.hydrate() {
                    tracing::error!("runtime: starting with partial message history: {}", e);
                }
            }));
        }

        if self.flush_task.is_none() {
            self.cancel_tx.send_replace(false);
            self.flush_task = Some(tokio::spawn(run_flush_loop(
                self.store.clone(),
                self.config.flush_debounce,
                self.cancel_tx.subscribe(),
            )));
        }

        self.scheduler.start();
    }

    /// Stop background work and write every pending conversation.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.stop();

        self.cancel_tx.send_replace(true);
        if let Some(task) = self.flush_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.hydration_task.take() {
            let _ = task.await;
        }

        let store = self.store.clone();
        let written = tokio::task::spawn_blocking(move || store.flush())
            .await
            .context("final flush task failed")??;

        tracing::info!("runtime: shutdown complete ({} conversation(s) flushed)", written);
        Ok(())
    }
}

async fn run_flush_loop(
    store: Arc<MessageStore>,
    debounce: Duration,
    mut cancel_rx: watch::Receiver<bool>,
) {
    // Nothing may reach storage before persisted history has been merged in.
    tokio::select! {
        _ = store.await_hydration() => {}
        _ = cancel_rx.changed() => {}
    }

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = store.flush_requested() => {}
        }

        // Let a burst of mutations coalesce into one write per conversation.
        tokio::select! {
            changed = cancel_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(debounce) => {}
        }

        let flush_store = store.clone();
        match tokio::task::spawn_blocking(move || flush_store.flush()).await {
            Ok(Ok(written)) if written > 0 => {
                tracing::debug!("runtime: flushed {} conversation(s)", written);
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!("runtime: flush failed: {}", e),
            Err(e) => tracing::warn!("runtime: flush task aborted: {}", e),
        }
    }

    tracing::debug!("runtime: flush loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use tempfile::tempdir;

    const CONV: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const ME: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    #[tokio::test]
    async fn test_messages_survive_restart() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = CoreConfig::new(dir.path()).with_flush_debounce(Duration::from_millis(10));

        {
            let mut runtime = CoreRuntime::new(config.clone()).unwrap();
            runtime.start();
            runtime.store().await_hydration().await;
            runtime.store().upsert(CONV, ME, Message::new("m1", ME, 10));
            runtime.shutdown().await.unwrap();
        }

        let mut runtime = CoreRuntime::new(config).unwrap();
        runtime.start();
        runtime.store().await_hydration().await;
        assert!(runtime.store().message(CONV, "m1").is_some());
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_loop_waits_for_hydration() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = CoreConfig::new(dir.path()).with_flush_debounce(Duration::from_millis(1));

        {
            let mut runtime = CoreRuntime::new(config.clone()).unwrap();
            runtime.start();
            runtime.store().await_hydration().await;
            for i in 0..3 {
                runtime
                    .store()
                    .upsert(CONV, ME, Message::new(format!("old{}", i), ME, 10 + i));
            }
            runtime.shutdown().await.unwrap();
        }

        // Upsert before hydration has started: the flush loop must not write
        // this lone message over the persisted conversation.
        let mut runtime = CoreRuntime::new(config.clone()).unwrap();
        runtime.store().upsert(CONV, ME, Message::new("new", ME, 100));
        runtime.start();
        runtime.store().await_hydration().await;
        assert_eq!(runtime.store().messages(CONV).unwrap().len(), 4);
        runtime.shutdown().await.unwrap();

        let mut runtime = CoreRuntime::new(config).unwrap();
        runtime.start();
        runtime.store().await_hydration().await;
        assert_eq!(runtime.store().messages(CONV).unwrap().len(), 4);
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_runtime() {
        let mut runtime = CoreRuntime::new(CoreConfig::in_memory()).unwrap();
        runtime.start();
        runtime.start();
        assert!(runtime.scheduler().is_armed());

        runtime.store().await_hydration().await;
        assert!(runtime.store().upsert(CONV, ME, Message::new("m1", ME, 10)));

        runtime.shutdown().await.unwrap();
        assert!(!runtime.scheduler().is_armed());
    }
}
