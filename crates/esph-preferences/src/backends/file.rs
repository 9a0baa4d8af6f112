//! Host file store
//!
//! All preferences live in one binary file made of records:
//!
//! ```text
//! key: u32 (little endian) | len: u8 | data: [u8; len]
//! ```

use super::keyed::{insert_if_changed, KeyedSlot, KeyedStore};
use crate::{PreferenceError, PreferenceObject, PreferenceResult, Preferences};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Largest payload a record can describe
const MAX_RECORD_LEN: usize = u8::MAX as usize;

struct FileStore {
    path: PathBuf,
    data: RefCell<BTreeMap<u32, Vec<u8>>>,
    dirty: Cell<bool>,
    writes: Cell<u32>,
}

impl KeyedStore for FileStore {
    fn put(&self, key: u32, data: &[u8]) -> PreferenceResult<()> {
        if data.len() > MAX_RECORD_LEN {
            return Err(PreferenceError::TooLarge {
                len: data.len(),
                max: MAX_RECORD_LEN,
            });
        }
        if insert_if_changed(&mut self.data.borrow_mut(), key, data) {
            self.dirty.set(true);
        }
        Ok(())
    }

    fn get(&self, key: u32) -> Option<Vec<u8>> {
        self.data.borrow().get(&key).cloned()
    }
}

impl FileStore {
    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Write atomically by first writing to a temp file, then renaming
    fn write_file(&self) -> PreferenceResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created preferences directory: {:?}", parent);
            }
        }

        let content = encode_records(&self.data.borrow());
        let temp_path = self.temp_path();
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

/// Preferences persisted to a single file
///
/// Clones share the same in-memory view.
#[derive(Clone)]
pub struct FilePreferences {
    store: Rc<FileStore>,
}

impl FilePreferences {
    /// Open the store at `path`, loading existing records
    ///
    /// A missing file is an empty store. A truncated trailing record is
    /// dropped with a warning.
    pub fn open(path: impl AsRef<Path>) -> PreferenceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let content = fs::read(&path)?;
            let records = decode_records(&content);
            debug!("Loaded {} preferences from {:?}", records.len(), path);
            records
        } else {
            debug!("Preferences file not found: {:?}", path);
            BTreeMap::new()
        };

        Ok(Self {
            store: Rc::new(FileStore {
                path,
                data: RefCell::new(data),
                dirty: Cell::new(false),
                writes: Cell::new(0),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.store.path
    }

    /// Number of times the file has been written
    pub fn write_count(&self) -> u32 {
        self.store.writes.get()
    }
}

impl Preferences for FilePreferences {
    fn make_preference_bytes(&self, length: usize, key: u32, _in_flash: bool) -> PreferenceObject {
        PreferenceObject::new(Rc::new(KeyedSlot::new(self.store.clone(), key, length)))
    }

    fn sync(&self) -> bool {
        if !self.store.dirty.get() {
            return true;
        }
        match self.store.write_file() {
            Ok(()) => {
                self.store.dirty.set(false);
                self.store.writes.set(self.store.writes.get() + 1);
                debug!(
                    "Saved {} preferences to {:?}",
                    self.store.data.borrow().len(),
                    self.store.path
                );
                true
            }
            Err(e) => {
                error!("Writing preferences to {:?} failed: {}", self.store.path, e);
                false
            }
        }
    }

    fn reset(&self) -> bool {
        debug!("Erasing preferences in {:?}", self.store.path);
        self.store.data.borrow_mut().clear();
        self.store.dirty.set(true);
        self.sync()
    }
}

fn encode_records(data: &BTreeMap<u32, Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in data {
        out.extend_from_slice(&key.to_le_bytes());
        // put() rejects anything longer
        out.push(value.len() as u8);
        out.extend_from_slice(value);
    }
    out
}

fn decode_records(mut bytes: &[u8]) -> BTreeMap<u32, Vec<u8>> {
    let mut data = BTreeMap::new();
    while !bytes.is_empty() {
        if bytes.len() < 5 {
            warn!("Ignoring truncated preference record header");
            break;
        }
        let key = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let len = usize::from(bytes[4]);
        let rest = &bytes[5..];
        if rest.len() < len {
            warn!("Ignoring truncated preference record for key {}", key);
            break;
        }
        data.insert(key, rest[..len].to_vec());
        bytes = &rest[len..];
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PreferencesExt;
    use tempfile::tempdir;

    #[test]
    fn test_values_survive_reopen_after_sync() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.prefs");

        let prefs = FilePreferences::open(&path).unwrap();
        assert!(prefs.make_preference::<u32>(1).save(&0xDEAD_BEEFu32));
        assert!(prefs.make_preference::<[u8; 3]>(2).save(&[1u8, 2, 3]));
        assert!(prefs.sync());
        assert!(!path.with_extension("prefs.tmp").exists());

        let reopened = FilePreferences::open(&path).unwrap();
        let mut a = 0u32;
        let mut b = [0u8; 3];
        assert!(reopened.make_preference::<u32>(1).load(&mut a));
        assert!(reopened.make_preference::<[u8; 3]>(2).load(&mut b));
        assert_eq!(a, 0xDEAD_BEEF);
        assert_eq!(b, [1, 2, 3]);
    }

    #[test]
    fn test_unsynced_values_are_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("device.prefs");

        let prefs = FilePreferences::open(&path).unwrap();
        prefs.make_preference::<u8>(1).save(&9u8);

        let reopened = FilePreferences::open(&path).unwrap();
        let mut value = 0u8;
        assert!(!reopened.make_preference::<u8>(1).load(&mut value));
        assert_eq!(value, 0);
    }

    #[test]
    fn test_sync_writes_only_when_dirty() {
        let dir = tempdir().unwrap();
        let prefs = FilePreferences::open(dir.path().join("p.bin")).unwrap();
        let pref = prefs.make_preference::<u16>(3);

        assert!(prefs.sync());
        assert_eq!(prefs.write_count(), 0);

        pref.save(&10u16);
        assert!(prefs.sync());
        assert!(prefs.sync());
        assert_eq!(prefs.write_count(), 1);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let dir = tempdir().unwrap();
        let prefs = FilePreferences::open(dir.path().join("p.bin")).unwrap();
        let pref = prefs.make_preference_bytes(300, 1, false);
        assert!(!pref.save_bytes(&[0u8; 300]));
    }

    #[test]
    fn test_truncated_file_keeps_complete_records() {
        let mut data = BTreeMap::new();
        data.insert(1u32, vec![1u8, 2]);
        data.insert(2u32, vec![3u8, 4, 5]);
        let mut encoded = encode_records(&data);
        encoded.truncate(encoded.len() - 1);

        let decoded = decode_records(&encoded);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get(&1), Some(&vec![1u8, 2]));
    }

    #[test]
    fn test_reset_empties_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.bin");
        let prefs = FilePreferences::open(&path).unwrap();
        prefs.make_preference::<u8>(1).save(&1u8);
        prefs.sync();

        assert!(prefs.reset());
        assert_eq!(fs::read(&path).unwrap().len(), 0);
    }
}
