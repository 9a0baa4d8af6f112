//! Volatile in-memory store

use super::keyed::{insert_if_changed, KeyedSlot, KeyedStore};
use crate::{PreferenceObject, PreferenceResult, Preferences};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

#[derive(Default)]
struct MemoryStore {
    data: RefCell<BTreeMap<u32, Vec<u8>>>,
    dirty: Cell<bool>,
    syncs: Cell<u32>,
}

impl KeyedStore for MemoryStore {
    fn put(&self, key: u32, data: &[u8]) -> PreferenceResult<()> {
        if insert_if_changed(&mut self.data.borrow_mut(), key, data) {
            self.dirty.set(true);
        }
        Ok(())
    }

    fn get(&self, key: u32) -> Option<Vec<u8>> {
        self.data.borrow().get(&key).cloned()
    }
}

/// Preferences kept in a map for the lifetime of the process
///
/// Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryPreferences {
    store: Rc<MemoryStore>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of syncs that found changes to flush
    pub fn sync_count(&self) -> u32 {
        self.store.syncs.get()
    }

    pub fn len(&self) -> usize {
        self.store.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.data.borrow().is_empty()
    }
}

impl Preferences for MemoryPreferences {
    fn make_preference_bytes(&self, length: usize, key: u32, _in_flash: bool) -> PreferenceObject {
        PreferenceObject::new(Rc::new(KeyedSlot::new(self.store.clone(), key, length)))
    }

    fn sync(&self) -> bool {
        if self.store.dirty.replace(false) {
            self.store.syncs.set(self.store.syncs.get() + 1);
            debug!("Synced {} in-memory preferences", self.len());
        }
        true
    }

    fn reset(&self) -> bool {
        debug!("Clearing in-memory preferences");
        self.store.data.borrow_mut().clear();
        self.store.dirty.set(false);
        true
    }
}
