//! The preference store interface

use crate::PreferenceObject;
use esph_core::helpers::fnv1_hash;
use std::mem::size_of;

/// A store that hands out preference slots
pub trait Preferences {
    /// Allocate a slot of `length` bytes for `key`
    ///
    /// `in_flash` selects flash-backed storage on stores that also offer a
    /// volatile retained region; other stores ignore it. Returns an invalid
    /// object when the store has no room left.
    fn make_preference_bytes(&self, length: usize, key: u32, in_flash: bool) -> PreferenceObject;

    /// Make every saved value durable
    ///
    /// Does nothing, and touches no storage, when nothing changed since the
    /// last successful sync.
    fn sync(&self) -> bool;

    /// Wipe every stored value
    fn reset(&self) -> bool;
}

/// Typed slot allocation
pub trait PreferencesExt: Preferences {
    /// Allocate a slot sized for `T`
    fn make_preference<T: bytemuck::Pod>(&self, key: u32) -> PreferenceObject {
        self.make_preference_bytes(size_of::<T>(), key, false)
    }

    /// Allocate a flash-backed slot sized for `T`
    fn make_preference_in_flash<T: bytemuck::Pod>(&self, key: u32) -> PreferenceObject {
        self.make_preference_bytes(size_of::<T>(), key, true)
    }
}

impl<P: Preferences + ?Sized> PreferencesExt for P {}

/// Derive a stable preference key from an object id and a type discriminator
///
/// The discriminator keeps different kinds of state for the same entity in
/// separate slots and should change whenever the stored layout changes.
pub fn preference_key(object_id: &str, discriminator: u32) -> u32 {
    fnv1_hash(object_id) ^ discriminator
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_key() {
        assert_eq!(preference_key("fan", 0), fnv1_hash("fan"));
        assert_ne!(preference_key("fan", 1), preference_key("fan", 2));
        assert_ne!(preference_key("fan", 1), preference_key("pump", 1));
    }
}
