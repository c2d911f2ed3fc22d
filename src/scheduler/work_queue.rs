// src/scheduler/work_queue.rs - Activation work items and the join/drain queue
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

use crate::audio::AudioError;
use crate::hardware::HardwareError;

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

/// Something that takes exclusive control of both motors for one asset.
#[async_trait]
pub trait ActivationHandler: Send + Sync {
    async fn activate(&self, asset: &Path) -> Result<(), ActivationError>;
}

/// A pending activation.
#[derive(Clone)]
pub enum WorkItem {
    /// Fired by the sound task's own timer; handled by the default activation.
    ScheduledSound { asset: PathBuf },
    /// Fired by an external trigger, carrying its own handler.
    ExternalEvent {
        source: String,
        asset: PathBuf,
        handler: Arc<dyn ActivationHandler>,
    },
}

impl WorkItem {
    pub fn asset(&self) -> &Path {
        match self {
            WorkItem::ScheduledSound { asset } | WorkItem::ExternalEvent { asset, .. } => asset,
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::ScheduledSound { asset } => {
                f.debug_struct("ScheduledSound").field("asset", asset).finish()
            }
            WorkItem::ExternalEvent { source, asset, .. } => f
                .debug_struct("ExternalEvent")
                .field("source", source)
                .field("asset", asset)
                .finish_non_exhaustive(),
        }
    }
}

/// FIFO with an unfinished-item counter. `join()` parks until every item put
/// has been marked done, which is what ambient tasks wait on.
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    unfinished: watch::Sender<usize>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (unfinished, _) = watch::channel(0);
        Self {
            items: Mutex::new(VecDeque::new()),
            unfinished,
        }
    }

    pub fn put(&self, item: WorkItem) {
        tracing::info!("Enqueuing {:?}", item);
        self.lock_items().push_back(item);
        self.unfinished.send_modify(|n| *n += 1);
    }

    pub fn try_get(&self) -> Option<WorkItem> {
        self.lock_items().pop_front()
    }

    pub fn task_done(&self) {
        self.unfinished.send_if_modified(|n| {
            if *n == 0 {
                tracing::warn!("task_done() called more times than items were put");
                return false;
            }
            *n -= 1;
            true
        });
    }

    /// Items put but not yet marked done, including ones already taken.
    pub fn pending(&self) -> usize {
        *self.unfinished.borrow()
    }

    pub fn queued(&self) -> usize {
        self.lock_items().len()
    }

    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    fn lock_items(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkItem>> {
        // Critical sections never panic, so a poisoned lock still holds a valid deque.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
