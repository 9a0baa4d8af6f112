//! Slots addressed directly by key
//!
//! Shared by stores that keep a map of key to blob and need no slot
//! allocation of their own.

use crate::object::report;
use crate::{PreferenceBackend, PreferenceError, PreferenceResult};
use std::collections::BTreeMap;
use std::rc::Rc;

pub(crate) trait KeyedStore {
    fn put(&self, key: u32, data: &[u8]) -> PreferenceResult<()>;
    fn get(&self, key: u32) -> Option<Vec<u8>>;
}

pub(crate) struct KeyedSlot<S: KeyedStore> {
    store: Rc<S>,
    key: u32,
    length: usize,
}

impl<S: KeyedStore> KeyedSlot<S> {
    pub(crate) fn new(store: Rc<S>, key: u32, length: usize) -> Self {
        Self { store, key, length }
    }

    fn check_length(&self, actual: usize) -> PreferenceResult<()> {
        if actual != self.length {
            return Err(PreferenceError::LengthMismatch {
                expected: self.length,
                actual,
            });
        }
        Ok(())
    }

    fn try_load(&self, data: &mut [u8]) -> PreferenceResult<()> {
        self.check_length(data.len())?;
        let stored = self.store.get(self.key).ok_or(PreferenceError::NotFound {
            key: self.key.to_string(),
        })?;
        if stored.len() != data.len() {
            return Err(PreferenceError::LengthMismatch {
                expected: data.len(),
                actual: stored.len(),
            });
        }
        data.copy_from_slice(&stored);
        Ok(())
    }
}

impl<S: KeyedStore> PreferenceBackend for KeyedSlot<S> {
    fn save(&self, data: &[u8]) -> bool {
        let result = self
            .check_length(data.len())
            .and_then(|()| self.store.put(self.key, data));
        report("save", result)
    }

    fn load(&self, data: &mut [u8]) -> bool {
        report("load", self.try_load(data))
    }
}

/// Insert `data` under `key`, returning whether the map changed
pub(crate) fn insert_if_changed(map: &mut BTreeMap<u32, Vec<u8>>, key: u32, data: &[u8]) -> bool {
    if map.get(&key).is_some_and(|existing| existing.as_slice() == data) {
        return false;
    }
    map.insert(key, data.to_vec());
    true
}
