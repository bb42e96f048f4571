use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::process::WorkerHandle;

/// Per-bot entry of the registry.
///
/// `op` serializes start and stop of the same bot (it is held across the
/// launch grace and the termination wait). `handle` is only locked briefly
/// and never across an await, so status queries never queue behind a
/// start or stop in progress.
#[derive(Debug, Default)]
pub struct BotSlot {
    pub(crate) op: tokio::sync::Mutex<()>,
    handle: Mutex<Option<WorkerHandle>>,
}

impl BotSlot {
    pub(crate) fn handle(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn install(&self, handle: WorkerHandle) -> Option<WorkerHandle> {
        self.handle().replace(handle)
    }

    pub(crate) fn take(&self) -> Option<WorkerHandle> {
        self.handle().take()
    }

    pub(crate) fn is_registered(&self) -> bool {
        self.handle().is_some()
    }
}

/// bot_id → worker handle map shared by concurrent control requests.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Mutex<HashMap<String, Arc<BotSlot>>>,
}

impl Registry {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Arc<BotSlot>>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The slot for `bot_id`, created empty if absent.
    pub(crate) fn slot(&self, bot_id: &str) -> Arc<BotSlot> {
        self.slots()
            .entry(bot_id.to_string())
            .or_default()
            .clone()
    }

    pub(crate) fn existing(&self, bot_id: &str) -> Option<Arc<BotSlot>> {
        self.slots().get(bot_id).cloned()
    }

    /// Drop the slot once it holds no handle and nobody else is using it.
    ///
    /// The caller's `slot` reference is consumed; the map holds the other
    /// one, so a strong count of two means no concurrent request is waiting.
    pub(crate) fn release(&self, bot_id: &str, slot: Arc<BotSlot>) {
        let mut slots = self.slots();
        let idle = Arc::strong_count(&slot) == 2 && !slot.is_registered();
        drop(slot);
        if idle {
            slots.remove(bot_id);
        }
    }

    /// All slots, for a status sweep. The map lock is released on return.
    pub(crate) fn snapshot(&self) -> Vec<(String, Arc<BotSlot>)> {
        let mut all: Vec<_> = self
            .slots()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of bots that currently have a worker handle.
    pub fn registered(&self) -> usize {
        self.slots().values().filter(|s| s.is_registered()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_is_shared_and_released_when_idle() {
        let registry = Registry::default();
        let a = registry.slot("a");
        let again = registry.slot("a");
        assert!(Arc::ptr_eq(&a, &again));

        // Another holder keeps the slot alive.
        registry.release("a", again);
        assert!(registry.existing("a").is_some());

        registry.release("a", a);
        assert!(registry.existing("a").is_none());
        assert_eq!(registry.registered(), 0);
    }

    #[test]
    fn snapshot_is_sorted() {
        let registry = Registry::default();
        for id in ["c", "a", "b"] {
            registry.slot(id);
        }
        let ids: Vec<_> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
