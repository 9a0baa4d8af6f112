//! Hashing and deduplication helpers

use std::cell::Cell;

/// FNV-1 hash of a string
///
/// Used to derive stable preference keys from an entity's object id.
pub fn fnv1_hash(s: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(16_777_619);
        hash ^= u32::from(byte);
    }
    hash
}

/// Dallas/Maxim CRC-8 (reflected polynomial 0x8C)
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        let mut inbyte = byte;
        for _ in 0..8 {
            let mix = (crc ^ inbyte) & 0x01;
            crc >>= 1;
            if mix != 0 {
                crc ^= 0x8C;
            }
            inbyte >>= 1;
        }
    }
    crc
}

/// Turn a display name into an object id
///
/// Lowercases ASCII letters, maps spaces to underscores and drops anything
/// outside `[a-z0-9_-]`.
pub fn object_id(name: &str) -> String {
    name.chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            'a'..='z' | '0'..='9' | '_' | '-' => Some(c),
            _ => None,
        })
        .collect()
}

/// Remembers the last value and reports whether a new one differs
#[derive(Debug)]
pub struct Deduplicator<T: Copy + PartialEq> {
    last: Cell<Option<T>>,
}

impl<T: Copy + PartialEq> Deduplicator<T> {
    pub fn new() -> Self {
        Self {
            last: Cell::new(None),
        }
    }

    /// Record `value`, returning `true` if it differs from the previous one
    pub fn next(&self, value: T) -> bool {
        if self.last.get() == Some(value) {
            return false;
        }
        self.last.set(Some(value));
        true
    }

    pub fn has_value(&self) -> bool {
        self.last.get().is_some()
    }
}

impl<T: Copy + PartialEq> Default for Deduplicator<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1_hash() {
        assert_eq!(fnv1_hash(""), 2_166_136_261);
        assert_ne!(fnv1_hash("living_room"), fnv1_hash("livingroom"));
        assert_eq!(fnv1_hash("abc"), fnv1_hash("abc"));
    }

    #[test]
    fn test_crc8() {
        assert_eq!(crc8(&[]), 0);
        // Check value for the Maxim CRC-8 of ASCII "123456789"
        assert_eq!(crc8(b"123456789"), 0xA1);
    }

    #[test]
    fn test_object_id() {
        assert_eq!(object_id("Living Room Temp"), "living_room_temp");
        assert_eq!(object_id("Door #2 (front)"), "door_2_front");
    }

    #[test]
    fn test_deduplicator() {
        let dedup = Deduplicator::new();
        assert!(!dedup.has_value());
        assert!(dedup.next(true));
        assert!(!dedup.next(true));
        assert!(dedup.next(false));
        assert!(dedup.has_value());
    }
}
