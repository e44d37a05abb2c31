//! Log Observers
//!
//! Callbacks for resource conditions detected by the log. The log only
//! keeps weak references: dropping the listener's last `Arc` unsubscribes
//! it. Listeners are invoked after the log's internal lock is released, so
//! they may call back into the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Free space snapshot passed to low disk space listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowDiskSpaceInfo {
    /// Bytes available under the WAL directory
    pub free_space: u64,
    /// Configured floor that was crossed
    pub free_space_limit: u64,
}

/// Notified when free space under the WAL directory drops below the limit
pub trait LowDiskSpaceListener: Send + Sync {
    fn low_disk_space(&self, info: &LowDiskSpaceInfo);
}

/// Notified when the log has outgrown its size limit
pub trait FullCheckpointRequestListener: Send + Sync {
    fn request_checkpoint(&self);
}

/// Handle returned by `subscribe`, used to unsubscribe explicitly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Weakly held listeners of one kind
pub(crate) struct ListenerRegistry<L: ?Sized> {
    listeners: RwLock<Vec<(ListenerToken, Weak<L>)>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, listener: &Arc<L>) -> ListenerToken {
        let token = ListenerToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((token, Arc::downgrade(listener)));
        token
    }

    pub(crate) fn unsubscribe(&self, token: ListenerToken) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    /// Upgrade every live listener, pruning dropped ones
    pub(crate) fn live(&self) -> Vec<Arc<L>> {
        let live: Vec<Arc<L>> = self
            .listeners
            .read()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();

        if live.len() != self.listeners.read().len() {
            self.listeners
                .write()
                .retain(|(_, weak)| weak.strong_count() > 0);
        }
        live
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .count()
    }
}
