//! Byte-packed flash sector
//!
//! Slots are packed back to back into a RAM mirror of one flash sector, in
//! the order they are requested. Each slot is its payload followed by a
//! check byte: a fixed seed xored with the four key bytes and every payload
//! byte. A slot that is still erased flash, check byte included, has never
//! been saved.

use crate::flash::{erase_sector, read_sector, write_sector};
use crate::object::report;
use crate::{PreferenceBackend, PreferenceError, PreferenceObject, PreferenceResult, Preferences};
use embedded_storage::nor_flash::NorFlash;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Bytes of the sector used for preferences
pub const FLASH_SECTOR_STORAGE_SIZE: usize = 512;

const CHECK_SEED: u8 = 0xA5;

fn check_byte(data: &[u8], key: u32) -> u8 {
    key.to_le_bytes()
        .iter()
        .chain(data)
        .fold(CHECK_SEED, |acc, byte| acc ^ byte)
}

struct SectorStore<F> {
    flash: RefCell<F>,
    sector_offset: u32,
    mirror: RefCell<[u8; FLASH_SECTOR_STORAGE_SIZE]>,
    dirty: Cell<bool>,
    prevent_write: Cell<bool>,
    next_offset: Cell<usize>,
}

struct SectorSlot<F> {
    store: Rc<SectorStore<F>>,
    offset: usize,
    length: usize,
    key: u32,
}

impl<F> SectorSlot<F> {
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
        let end = self.offset + self.length;
        let mut mirror = self.store.mirror.borrow_mut();
        let check = check_byte(data, self.key);
        if mirror[self.offset..end] != *data || mirror[end] != check {
            mirror[self.offset..end].copy_from_slice(data);
            mirror[end] = check;
            self.store.dirty.set(true);
        }
        Ok(())
    }

    fn try_load(&self, data: &mut [u8]) -> PreferenceResult<()> {
        self.check_length(data.len())?;
        let end = self.offset + self.length;
        let mirror = self.store.mirror.borrow();
        if mirror[self.offset..=end].iter().all(|&byte| byte == 0xFF) {
            return Err(PreferenceError::NotFound {
                key: self.key.to_string(),
            });
        }
        let stored = &mirror[self.offset..end];
        if check_byte(stored, self.key) != mirror[end] {
            return Err(PreferenceError::ChecksumMismatch { key: self.key });
        }
        data.copy_from_slice(stored);
        Ok(())
    }
}

impl<F> PreferenceBackend for SectorSlot<F> {
    fn save(&self, data: &[u8]) -> bool {
        report("save", self.try_save(data))
    }

    fn load(&self, data: &mut [u8]) -> bool {
        report("load", self.try_load(data))
    }
}

/// Preferences packed into a single flash sector
pub struct FlashSectorPreferences<F> {
    store: Rc<SectorStore<F>>,
}

impl<F: NorFlash> FlashSectorPreferences<F> {
    /// Build the store, loading the mirror from the sector at `sector_offset`
    pub fn new(mut flash: F, sector_offset: u32) -> Self {
        let mut mirror = [0xFFu8; FLASH_SECTOR_STORAGE_SIZE];
        if let Err(e) = read_sector(&mut flash, sector_offset, &mut mirror) {
            error!("Reading preferences sector failed: {}", e);
            mirror = [0xFF; FLASH_SECTOR_STORAGE_SIZE];
        }

        Self {
            store: Rc::new(SectorStore {
                flash: RefCell::new(flash),
                sector_offset,
                mirror: RefCell::new(mirror),
                dirty: Cell::new(false),
                prevent_write: Cell::new(false),
                next_offset: Cell::new(0),
            }),
        }
    }

    /// Bytes still free for new slots
    pub fn remaining(&self) -> usize {
        FLASH_SECTOR_STORAGE_SIZE - self.store.next_offset.get()
    }
}

impl<F: NorFlash + 'static> Preferences for FlashSectorPreferences<F> {
    fn make_preference_bytes(&self, length: usize, key: u32, _in_flash: bool) -> PreferenceObject {
        let start = self.store.next_offset.get();
        let end = start + length + 1;
        if end > FLASH_SECTOR_STORAGE_SIZE {
            warn!(
                "No room for a {} byte preference, {} bytes left",
                length,
                self.remaining()
            );
            return PreferenceObject::invalid();
        }
        self.store.next_offset.set(end);

        PreferenceObject::new(Rc::new(SectorSlot {
            store: self.store.clone(),
            offset: start,
            length,
            key,
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

        let result = {
            let mirror = self.store.mirror.borrow();
            let mut flash = self.store.flash.borrow_mut();
            critical_section::with(|_| {
                write_sector(&mut *flash, self.store.sector_offset, &*mirror)
            })
        };
        match result {
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
        *self.store.mirror.borrow_mut() = [0xFF; FLASH_SECTOR_STORAGE_SIZE];
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
