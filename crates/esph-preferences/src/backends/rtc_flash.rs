//! Retained RTC words plus a mirrored flash sector
//!
//! Slots are allocated sequentially in the order they are requested, so a
//! firmware must request its preferences in the same order on every boot.
//! Each slot is `length_words` payload words followed by one check word
//! derived from the payload and the slot key. A slot that still reads as
//! blank memory (zeroed RTC words, erased flash) has never been saved.
//!
//! RTC memory keeps its contents across resets but not across power loss.
//! Its first 32 words are shared with the bootloader, so the allocator
//! hands them out last:
//!
//! ```text
//! slot word   0 ..  95  →  RTC word  32 .. 127
//! slot word  96 .. 127  →  RTC word   0 ..  31
//! ```
//!
//! Flash slots live in a RAM mirror of one sector that is written back on
//! [`Preferences::sync`].

use crate::flash::{erase_sector, read_sector, write_sector};
use crate::object::report;
use crate::{PreferenceBackend, PreferenceError, PreferenceObject, PreferenceResult, Preferences};
use embedded_storage::nor_flash::NorFlash;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Words available in each region
pub const RTC_FLASH_STORAGE_WORDS: usize = 128;

/// Slot words below this index map past the bootloader area
const RTC_NORMAL_REGION_WORDS: usize = 96;
/// RTC words reserved by the bootloader
const RTC_EBOOT_WORDS: usize = RTC_FLASH_STORAGE_WORDS - RTC_NORMAL_REGION_WORDS;

const FLASH_STORAGE_BYTES: usize = RTC_FLASH_STORAGE_WORDS * 4;

/// Retained RTC user memory
///
/// Clones share the same words, so a store rebuilt on a clone sees what
/// the previous one wrote, as after a reset.
#[derive(Clone)]
pub struct RtcMemory {
    words: Rc<RefCell<[u32; RTC_FLASH_STORAGE_WORDS]>>,
}

impl Default for RtcMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcMemory {
    pub fn new() -> Self {
        Self {
            words: Rc::new(RefCell::new([0; RTC_FLASH_STORAGE_WORDS])),
        }
    }

    pub fn read(&self, index: usize) -> PreferenceResult<u32> {
        self.words
            .borrow()
            .get(index)
            .copied()
            .ok_or(PreferenceError::OutOfBounds {
                offset: index,
                capacity: RTC_FLASH_STORAGE_WORDS,
            })
    }

    pub fn write(&self, index: usize, value: u32) -> PreferenceResult<()> {
        let mut words = self.words.borrow_mut();
        let word = words.get_mut(index).ok_or(PreferenceError::OutOfBounds {
            offset: index,
            capacity: RTC_FLASH_STORAGE_WORDS,
        })?;
        *word = value;
        Ok(())
    }

    /// Lose all contents, as on power loss
    pub fn power_loss(&self) {
        *self.words.borrow_mut() = [0; RTC_FLASH_STORAGE_WORDS];
    }
}

const CRC_SEED: u32 = 0xA5A5_A5A5;

/// Check word for a slot
fn slot_crc(words: &[u32], key: u32) -> u32 {
    words
        .iter()
        .fold(key ^ CRC_SEED, |crc, word| crc ^ (word.wrapping_mul(2654435769) >> 1))
}

fn bytes_to_words(data: &[u8], length_words: usize) -> Vec<u32> {
    let mut words = vec![0u32; length_words];
    for (word, chunk) in words.iter_mut().zip(data.chunks(4)) {
        let mut bytes = [0u8; 4];
        bytes[..chunk.len()].copy_from_slice(chunk);
        *word = u32::from_le_bytes(bytes);
    }
    words
}

fn words_to_bytes(words: &[u32], data: &mut [u8]) {
    for (chunk, word) in data.chunks_mut(4).zip(words) {
        let bytes = word.to_le_bytes();
        chunk.copy_from_slice(&bytes[..chunk.len()]);
    }
}

struct RtcFlashStore<F> {
    rtc: RtcMemory,
    flash: RefCell<F>,
    sector_offset: u32,
    mirror: RefCell<[u32; RTC_FLASH_STORAGE_WORDS]>,
    dirty: Cell<bool>,
    prevent_write: Cell<bool>,
    next_rtc_word: Cell<usize>,
    next_flash_word: Cell<usize>,
}

impl<F: NorFlash> RtcFlashStore<F> {
    fn rtc_index(slot_word: usize) -> usize {
        if slot_word < RTC_NORMAL_REGION_WORDS {
            slot_word + RTC_EBOOT_WORDS
        } else {
            slot_word - RTC_NORMAL_REGION_WORDS
        }
    }

    fn write_rtc(&self, slot_word: usize, value: u32) -> PreferenceResult<()> {
        let index = Self::rtc_index(slot_word);
        if index < RTC_EBOOT_WORDS && self.prevent_write.get() {
            return Err(PreferenceError::WriteProtected);
        }
        self.rtc.write(index, value)
    }

    fn read_rtc(&self, slot_word: usize) -> PreferenceResult<u32> {
        self.rtc.read(Self::rtc_index(slot_word))
    }

    fn write_flash(&self, word: usize, value: u32) {
        let mut mirror = self.mirror.borrow_mut();
        if mirror[word] != value {
            mirror[word] = value;
            self.dirty.set(true);
        }
    }

    fn flush(&self) -> PreferenceResult<()> {
        let mut bytes = [0u8; FLASH_STORAGE_BYTES];
        for (chunk, word) in bytes.chunks_mut(4).zip(self.mirror.borrow().iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let mut flash = self.flash.borrow_mut();
        critical_section::with(|_| write_sector(&mut *flash, self.sector_offset, &bytes))
    }
}

struct RtcFlashSlot<F> {
    store: Rc<RtcFlashStore<F>>,
    offset: usize,
    length_words: usize,
    key: u32,
    in_flash: bool,
}

impl<F: NorFlash> RtcFlashSlot<F> {
    fn check_length(&self, len: usize) -> PreferenceResult<()> {
        if len.div_ceil(4) != self.length_words {
            return Err(PreferenceError::LengthMismatch {
                expected: self.length_words * 4,
                actual: len,
            });
        }
        Ok(())
    }

    fn try_save(&self, data: &[u8]) -> PreferenceResult<()> {
        self.check_length(data.len())?;
        let mut words = bytes_to_words(data, self.length_words);
        words.push(slot_crc(&words, self.key));

        for (i, word) in words.into_iter().enumerate() {
            if self.in_flash {
                self.store.write_flash(self.offset + i, word);
            } else {
                self.store.write_rtc(self.offset + i, word)?;
            }
        }
        Ok(())
    }

    fn try_load(&self, data: &mut [u8]) -> PreferenceResult<()> {
        self.check_length(data.len())?;
        let mut words = Vec::with_capacity(self.length_words + 1);
        for i in 0..=self.length_words {
            let word = if self.in_flash {
                self.store.mirror.borrow()[self.offset + i]
            } else {
                self.store.read_rtc(self.offset + i)?
            };
            words.push(word);
        }

        let blank = if self.in_flash { u32::MAX } else { 0 };
        if words.iter().all(|&word| word == blank) {
            return Err(PreferenceError::NotFound {
                key: self.key.to_string(),
            });
        }

        let stored_crc = words.pop().unwrap_or_default();
        if slot_crc(&words, self.key) != stored_crc {
            return Err(PreferenceError::ChecksumMismatch { key: self.key });
        }
        words_to_bytes(&words, data);
        Ok(())
    }
}

impl<F: NorFlash> PreferenceBackend for RtcFlashSlot<F> {
    fn save(&self, data: &[u8]) -> bool {
        report("save", self.try_save(data))
    }

    fn load(&self, data: &mut [u8]) -> bool {
        report("load", self.try_load(data))
    }
}

/// Preferences in retained RTC memory, with an optional flash region
///
/// Slots created with `in_flash` survive power loss once synced; the
/// others survive resets only and need no sync.
pub struct RtcFlashPreferences<F> {
    store: Rc<RtcFlashStore<F>>,
}

impl<F: NorFlash> RtcFlashPreferences<F> {
    /// Build the store, loading the flash mirror from the sector at
    /// `sector_offset`
    pub fn new(rtc: RtcMemory, mut flash: F, sector_offset: u32) -> Self {
        let mut mirror = [0xFFFF_FFFFu32; RTC_FLASH_STORAGE_WORDS];
        let mut bytes = [0u8; FLASH_STORAGE_BYTES];
        match read_sector(&mut flash, sector_offset, &mut bytes) {
            Ok(()) => {
                for (word, chunk) in mirror.iter_mut().zip(bytes.chunks(4)) {
                    *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
            }
            Err(e) => error!("Reading preferences sector failed: {}", e),
        }

        Self {
            store: Rc::new(RtcFlashStore {
                rtc,
                flash: RefCell::new(flash),
                sector_offset,
                mirror: RefCell::new(mirror),
                dirty: Cell::new(false),
                prevent_write: Cell::new(false),
                next_rtc_word: Cell::new(0),
                next_flash_word: Cell::new(0),
            }),
        }
    }

    /// Whether flash-backed slots have unsynced changes
    pub fn is_dirty(&self) -> bool {
        self.store.dirty.get()
    }

    fn allocate_rtc(&self, length_words: usize) -> Option<usize> {
        let mut start = self.store.next_rtc_word.get();
        let mut end = start + length_words + 1;
        // a slot never spans the two mapped regions
        if start < RTC_NORMAL_REGION_WORDS && end > RTC_NORMAL_REGION_WORDS {
            start = RTC_NORMAL_REGION_WORDS;
            end = start + length_words + 1;
        }
        if end > RTC_FLASH_STORAGE_WORDS {
            return None;
        }
        self.store.next_rtc_word.set(end);
        Some(start)
    }

    fn allocate_flash(&self, length_words: usize) -> Option<usize> {
        let start = self.store.next_flash_word.get();
        let end = start + length_words + 1;
        if end > RTC_FLASH_STORAGE_WORDS {
            return None;
        }
        self.store.next_flash_word.set(end);
        Some(start)
    }
}

impl<F: NorFlash + 'static> Preferences for RtcFlashPreferences<F> {
    fn make_preference_bytes(&self, length: usize, key: u32, in_flash: bool) -> PreferenceObject {
        let length_words = length.div_ceil(4);
        let offset = if in_flash {
            self.allocate_flash(length_words)
        } else {
            self.allocate_rtc(length_words)
        };
        let Some(offset) = offset else {
            warn!(
                "No room for a {} word preference in {}",
                length_words,
                if in_flash { "flash" } else { "RTC memory" }
            );
            return PreferenceObject::invalid();
        };

        PreferenceObject::new(Rc::new(RtcFlashSlot {
            store: self.store.clone(),
            offset,
            length_words,
            key,
            in_flash,
        }))
    }

    fn sync(&self) -> bool {
        if !self.store.dirty.get() {
            return true;
        }
        if self.store.prevent_write.get() {
            warn!("Preferences were reset, not writing flash until restart");
            return false;
        }
        match self.store.flush() {
            Ok(()) => {
                self.store.dirty.set(false);
                debug!("Saved preferences to flash");
                true
            }
            Err(e) => {
                error!("Saving preferences to flash failed: {}", e);
                false
            }
        }
    }

    fn reset(&self) -> bool {
        debug!("Erasing preferences sector");
        let result = {
            let mut flash = self.store.flash.borrow_mut();
            critical_section::with(|_| erase_sector(&mut *flash, self.store.sector_offset))
        };
        self.store.prevent_write.set(true);
        *self.store.mirror.borrow_mut() = [0xFFFF_FFFF; RTC_FLASH_STORAGE_WORDS];
        self.store.dirty.set(false);
        match result {
            Ok(()) => true,
            Err(e) => {
                error!("Erasing preferences sector failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemoryFlash;
    use crate::PreferencesExt;

    fn store(rtc: &RtcMemory, flash: &MemoryFlash) -> RtcFlashPreferences<MemoryFlash> {
        RtcFlashPreferences::new(rtc.clone(), flash.clone(), 0)
    }

    #[test]
    fn test_crc_depends_on_key() {
        let words = [1u32, 2, 3];
        assert_ne!(slot_crc(&words, 1), slot_crc(&words, 2));
        assert_eq!(slot_crc(&[], 7), 7 ^ CRC_SEED);
        assert_ne!(slot_crc(&[0], 0), 0);
    }

    #[test]
    fn test_rtc_index_mapping() {
        type Store = RtcFlashStore<MemoryFlash>;
        assert_eq!(Store::rtc_index(0), 32);
        assert_eq!(Store::rtc_index(95), 127);
        assert_eq!(Store::rtc_index(96), 0);
        assert_eq!(Store::rtc_index(127), 31);
    }

    #[test]
    fn test_rtc_slot_never_straddles_boundary() {
        let prefs = store(&RtcMemory::new(), &MemoryFlash::new(1));
        // 94 words + crc fills words 0..95
        assert!(prefs.make_preference_bytes(94 * 4, 1, false).is_valid());
        // 2 words + crc would cover 95..98, so it moves to 96
        assert!(prefs.make_preference_bytes(8, 2, false).is_valid());
        assert_eq!(prefs.store.next_rtc_word.get(), 99);
        // 29 words + crc no longer fit
        assert!(!prefs.make_preference_bytes(29 * 4, 3, false).is_valid());
    }

    #[test]
    fn test_rtc_survives_reset_not_power_loss() {
        let rtc = RtcMemory::new();
        let flash = MemoryFlash::new(1);

        let prefs = store(&rtc, &flash);
        assert!(prefs.make_preference::<u32>(5).save(&1234u32));

        let prefs = store(&rtc, &flash);
        let mut value = 0u32;
        assert!(prefs.make_preference::<u32>(5).load(&mut value));
        assert_eq!(value, 1234);

        rtc.power_loss();
        let prefs = store(&rtc, &flash);
        let mut value = 0u32;
        assert!(!prefs.make_preference::<u32>(5).load(&mut value));
    }

    #[test]
    fn test_reset_protects_bootloader_words() {
        let prefs = store(&RtcMemory::new(), &MemoryFlash::new(1));
        let low = prefs.make_preference_bytes(4, 1, false);
        let high = prefs.make_preference_bytes(93 * 4, 2, false);
        let eboot = prefs.make_preference::<u32>(3);
        assert!(low.is_valid() && high.is_valid() && eboot.is_valid());

        assert!(eboot.save(&1u32));
        assert!(prefs.reset());
        assert!(!eboot.save(&2u32));
        assert!(low.save_bytes(&[1, 2, 3, 4]));
    }
}
