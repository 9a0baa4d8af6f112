//! Preference handles

use crate::PreferenceResult;
use bytemuck::Pod;
use std::fmt;
use std::rc::Rc;
use tracing::{trace, warn};

/// Storage for one preference slot
pub trait PreferenceBackend {
    /// Store `data`; durable only after the owning store syncs
    fn save(&self, data: &[u8]) -> bool;

    /// Fill `data` from storage, leaving it untouched on failure
    fn load(&self, data: &mut [u8]) -> bool;
}

/// Convert a backend result into the boolean contract, logging failures
pub(crate) fn report(op: &str, result: PreferenceResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) if e.is_not_found() => {
            trace!("Preference {}: {}", op, e);
            false
        }
        Err(e) => {
            warn!("Preference {} failed: {}", op, e);
            false
        }
    }
}

/// Handle to a persisted value
///
/// An invalid handle (the store ran out of space) fails every operation.
#[derive(Clone, Default)]
pub struct PreferenceObject {
    backend: Option<Rc<dyn PreferenceBackend>>,
}

impl PreferenceObject {
    pub fn new(backend: Rc<dyn PreferenceBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A handle that is not bound to any storage
    pub fn invalid() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.backend.is_some()
    }

    /// Save a plain-old-data value
    pub fn save<T: Pod>(&self, value: &T) -> bool {
        self.save_bytes(bytemuck::bytes_of(value))
    }

    /// Load a plain-old-data value; `value` keeps its contents on failure
    pub fn load<T: Pod>(&self, value: &mut T) -> bool {
        self.load_bytes(bytemuck::bytes_of_mut(value))
    }

    pub fn save_bytes(&self, data: &[u8]) -> bool {
        match &self.backend {
            Some(backend) => backend.save(data),
            None => false,
        }
    }

    pub fn load_bytes(&self, data: &mut [u8]) -> bool {
        match &self.backend {
            Some(backend) => backend.load(data),
            None => false,
        }
    }
}

impl fmt::Debug for PreferenceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreferenceObject")
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_object_fails() {
        let pref = PreferenceObject::invalid();
        assert!(!pref.is_valid());

        let mut value = 5u32;
        assert!(!pref.save(&value));
        assert!(!pref.load(&mut value));
        assert_eq!(value, 5);
    }
}
