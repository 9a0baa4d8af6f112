//! Key/value flash store
//!
//! Saves are staged in a pending list and written on [`Preferences::sync`].
//! The underlying store keeps its own integrity data, so no check bytes are
//! added here.

use crate::object::report;
use crate::{PreferenceBackend, PreferenceError, PreferenceObject, PreferenceResult, Preferences};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, error, trace, warn};

/// A namespace in a key/value flash store
pub trait NvsStore {
    /// Committed or staged blob for `key`
    fn get_blob(&self, key: &str) -> PreferenceResult<Option<Vec<u8>>>;

    /// Stage a blob; durable after [`NvsStore::commit`]
    fn set_blob(&mut self, key: &str, data: &[u8]) -> PreferenceResult<()>;

    fn commit(&mut self) -> PreferenceResult<()>;

    /// Remove every key in the namespace
    fn erase_all(&mut self) -> PreferenceResult<()>;
}

#[derive(Default)]
struct NvsState {
    staged: BTreeMap<String, Vec<u8>>,
    committed: BTreeMap<String, Vec<u8>>,
    commits: u32,
    writes: u32,
    fail_writes: bool,
}

/// RAM-backed [`NvsStore`]
///
/// Clones share the same namespace; [`MemoryNvs::power_cycle`] drops
/// anything not yet committed.
#[derive(Clone, Default)]
pub struct MemoryNvs {
    state: Rc<RefCell<NvsState>>,
}

impl MemoryNvs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard uncommitted writes
    pub fn power_cycle(&self) {
        let mut state = self.state.borrow_mut();
        state.staged = state.committed.clone();
    }

    pub fn commit_count(&self) -> u32 {
        self.state.borrow().commits
    }

    /// Number of blobs written
    pub fn write_count(&self) -> u32 {
        self.state.borrow().writes
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }
}

impl NvsStore for MemoryNvs {
    fn get_blob(&self, key: &str) -> PreferenceResult<Option<Vec<u8>>> {
        Ok(self.state.borrow().staged.get(key).cloned())
    }

    fn set_blob(&mut self, key: &str, data: &[u8]) -> PreferenceResult<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(PreferenceError::Nvs(format!("set_blob {} failed", key)));
        }
        state.staged.insert(key.to_string(), data.to_vec());
        state.writes += 1;
        Ok(())
    }

    fn commit(&mut self) -> PreferenceResult<()> {
        let mut state = self.state.borrow_mut();
        state.committed = state.staged.clone();
        state.commits += 1;
        Ok(())
    }

    fn erase_all(&mut self) -> PreferenceResult<()> {
        let mut state = self.state.borrow_mut();
        state.staged.clear();
        state.committed.clear();
        state.commits += 1;
        Ok(())
    }
}

struct PendingSave {
    key: String,
    data: Vec<u8>,
}

struct NvsInner<S> {
    nvs: RefCell<S>,
    pending: RefCell<Vec<PendingSave>>,
    valid: Cell<bool>,
}

struct NvsSlot<S> {
    inner: Rc<NvsInner<S>>,
    key: String,
    length: usize,
}

impl<S: NvsStore> NvsSlot<S> {
    fn check_length(&self, actual: usize) -> PreferenceResult<()> {
        if actual != self.length {
            return Err(PreferenceError::LengthMismatch {
                expected: self.length,
                actual,
            });
        }
        Ok(())
    }

    fn try_save(&self, data: &[u8]) -> PreferenceResult<()> {
        self.check_length(data.len())?;
        if !self.inner.valid.get() {
            return Err(PreferenceError::WriteProtected);
        }
        let mut pending = self.inner.pending.borrow_mut();
        match pending.iter_mut().find(|p| p.key == self.key) {
            Some(existing) => existing.data = data.to_vec(),
            None => pending.push(PendingSave {
                key: self.key.clone(),
                data: data.to_vec(),
            }),
        }
        Ok(())
    }

    fn try_load(&self, data: &mut [u8]) -> PreferenceResult<()> {
        self.check_length(data.len())?;
        if let Some(p) = self
            .inner
            .pending
            .borrow()
            .iter()
            .find(|p| p.key == self.key)
        {
            if p.data.len() != data.len() {
                return Err(PreferenceError::LengthMismatch {
                    expected: data.len(),
                    actual: p.data.len(),
                });
            }
            data.copy_from_slice(&p.data);
            return Ok(());
        }

        let stored = self
            .inner
            .nvs
            .borrow()
            .get_blob(&self.key)?
            .ok_or_else(|| PreferenceError::NotFound {
                key: self.key.clone(),
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

impl<S: NvsStore> PreferenceBackend for NvsSlot<S> {
    fn save(&self, data: &[u8]) -> bool {
        report("save", self.try_save(data))
    }

    fn load(&self, data: &mut [u8]) -> bool {
        report("load", self.try_load(data))
    }
}

/// Preferences in a key/value flash store
///
/// Every slot is keyed by the decimal form of its key. Nothing touches the
/// store until [`Preferences::sync`], which writes only blobs whose content
/// changed and then commits once.
pub struct NvsPreferences<S> {
    inner: Rc<NvsInner<S>>,
}

impl<S: NvsStore> NvsPreferences<S> {
    pub fn new(nvs: S) -> Self {
        Self {
            inner: Rc::new(NvsInner {
                nvs: RefCell::new(nvs),
                pending: RefCell::new(Vec::new()),
                valid: Cell::new(true),
            }),
        }
    }

    /// Number of saves waiting for the next sync
    pub fn pending(&self) -> usize {
        self.inner.pending.borrow().len()
    }

    fn is_changed(nvs: &S, key: &str, data: &[u8]) -> bool {
        match nvs.get_blob(key) {
            Ok(Some(stored)) => stored != data,
            Ok(None) => true,
            Err(e) => {
                trace!("Reading {} before write failed: {}", key, e);
                true
            }
        }
    }
}

impl<S: NvsStore + 'static> Preferences for NvsPreferences<S> {
    fn make_preference_bytes(&self, length: usize, key: u32, _in_flash: bool) -> PreferenceObject {
        PreferenceObject::new(Rc::new(NvsSlot {
            inner: self.inner.clone(),
            key: key.to_string(),
            length,
        }))
    }

    fn sync(&self) -> bool {
        let pending = std::mem::take(&mut *self.inner.pending.borrow_mut());
        if pending.is_empty() {
            return true;
        }
        if !self.inner.valid.get() {
            warn!("Preferences were reset, dropping {} pending saves", pending.len());
            return false;
        }

        let mut nvs = self.inner.nvs.borrow_mut();
        let (mut cached, mut written, mut failed) = (0, 0, 0);
        for save in &pending {
            if !Self::is_changed(&nvs, &save.key, &save.data) {
                cached += 1;
                continue;
            }
            match nvs.set_blob(&save.key, &save.data) {
                Ok(()) => written += 1,
                Err(e) => {
                    error!("Writing preference {} failed: {}", save.key, e);
                    failed += 1;
                }
            }
        }
        debug!(
            "Saving {} preferences: {} cached, {} written, {} failed",
            pending.len(),
            cached,
            written,
            failed
        );

        if let Err(e) = nvs.commit() {
            error!("Committing preferences failed: {}", e);
            return false;
        }
        failed == 0
    }

    fn reset(&self) -> bool {
        debug!("Erasing preferences namespace");
        self.inner.pending.borrow_mut().clear();
        self.inner.valid.set(false);
        match self.inner.nvs.borrow_mut().erase_all() {
            Ok(()) => true,
            Err(e) => {
                error!("Erasing preferences failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PreferencesExt;

    #[test]
    fn test_second_save_replaces_pending() {
        let nvs = MemoryNvs::new();
        let prefs = NvsPreferences::new(nvs.clone());
        let pref = prefs.make_preference::<u32>(1);

        pref.save(&1u32);
        pref.save(&2u32);
        assert_eq!(prefs.pending(), 1);

        let mut value = 0u32;
        assert!(pref.load(&mut value));
        assert_eq!(value, 2);
        assert_eq!(nvs.write_count(), 0);
    }

    #[test]
    fn test_sync_skips_unchanged_blobs() {
        let nvs = MemoryNvs::new();
        let prefs = NvsPreferences::new(nvs.clone());
        let pref = prefs.make_preference::<u32>(1);

        pref.save(&7u32);
        assert!(prefs.sync());
        assert_eq!(nvs.write_count(), 1);

        pref.save(&7u32);
        assert!(prefs.sync());
        assert_eq!(nvs.write_count(), 1);
    }

    #[test]
    fn test_failed_write_reports_false() {
        let nvs = MemoryNvs::new();
        let prefs = NvsPreferences::new(nvs.clone());
        prefs.make_preference::<u8>(1).save(&1u8);

        nvs.set_fail_writes(true);
        assert!(!prefs.sync());
        assert_eq!(prefs.pending(), 0);
    }

    #[test]
    fn test_saves_fail_after_reset() {
        let prefs = NvsPreferences::new(MemoryNvs::new());
        let pref = prefs.make_preference::<u8>(1);
        assert!(prefs.reset());
        assert!(!pref.save(&1u8));
    }
}
