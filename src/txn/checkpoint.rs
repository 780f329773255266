//! Checkpoint statistics and the background checkpointer

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Sender};

use crate::error::Result;
use crate::wal::Lsn;
use super::TransactionManager;

/// Summary of one checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub begin_lsn: Lsn,
    pub end_lsn: Lsn,
    /// Transactions still running when it was taken
    pub active_txns: usize,
    pub dirty_items: usize,
    /// Log records dropped by truncation
    pub records_truncated: u64,
}

/// Background thread that checkpoints at a fixed interval
pub struct Checkpointer {
    shutdown: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Checkpointer {
    /// Start checkpointing `manager` every `interval`.
    ///
    /// The thread holds only a weak reference and exits on its own once the
    /// manager is gone.
    pub fn spawn(manager: Weak<TransactionManager>, interval: Duration) -> Result<Self> {
        let (shutdown, stop) = channel::bounded::<()>(1);
        let ticker = channel::tick(interval);

        let handle = thread::Builder::new()
            .name("keystone-checkpointer".to_string())
            .spawn(move || loop {
                crossbeam::select! {
                    recv(stop) -> _ => break,
                    recv(ticker) -> _ => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        if let Err(e) = manager.checkpoint() {
                            tracing::error!(error = %e, "background checkpoint failed");
                        }
                    }
                }
            })?;

        tracing::debug!(?interval, "background checkpointer started");
        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.shutdown.send(());
            if handle.join().is_err() {
                tracing::error!("background checkpointer panicked");
            }
        }
    }
}

impl Drop for Checkpointer {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
