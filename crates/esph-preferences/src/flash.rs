//! NOR flash helpers
//!
//! Flash-backed stores work against any
//! [`embedded_storage::nor_flash::NorFlash`] implementation. [`MemoryFlash`]
//! emulates one in RAM for host builds and tests.

use crate::{PreferenceError, PreferenceResult};
use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashError, NorFlashErrorKind,
    ReadNorFlash,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Size of one erasable sector
pub const SECTOR_SIZE: usize = 4096;

struct FlashState {
    data: Vec<u8>,
    erases: u32,
    writes: u32,
    fail_writes: bool,
}

/// RAM-backed NOR flash
///
/// Erased bytes read as `0xFF`; writes can only clear bits, as on real
/// parts. Clones share the same contents, so a store can be rebuilt on top
/// of a clone to simulate a reboot.
#[derive(Clone)]
pub struct MemoryFlash {
    state: Rc<RefCell<FlashState>>,
}

impl MemoryFlash {
    /// Create a flash of `sectors` erased sectors
    pub fn new(sectors: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(FlashState {
                data: vec![0xFF; sectors * SECTOR_SIZE],
                erases: 0,
                writes: 0,
                fail_writes: false,
            })),
        }
    }

    /// Number of sector erases performed
    pub fn erase_count(&self) -> u32 {
        self.state.borrow().erases
    }

    /// Number of write operations performed
    pub fn write_count(&self) -> u32 {
        self.state.borrow().writes
    }

    /// Make every following erase and write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.borrow_mut().fail_writes = fail;
    }

    /// Copy of the raw contents
    pub fn contents(&self) -> Vec<u8> {
        self.state.borrow().data.clone()
    }
}

impl ErrorType for MemoryFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemoryFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let state = self.state.borrow();
        let start = offset as usize;
        bytes.copy_from_slice(&state.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.state.borrow().data.len()
    }
}

impl NorFlash for MemoryFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        state.data[from as usize..to as usize].fill(0xFF);
        state.erases += (to - from) / SECTOR_SIZE as u32;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let mut state = self.state.borrow_mut();
        if state.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        let start = offset as usize;
        for (cell, byte) in state.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        state.writes += 1;
        Ok(())
    }
}

/// Read `bytes.len()` bytes at `offset`
pub(crate) fn read_sector<F: ReadNorFlash>(
    flash: &mut F,
    offset: u32,
    bytes: &mut [u8],
) -> PreferenceResult<()> {
    flash.read(offset, bytes).map_err(|e| PreferenceError::FlashRead {
        offset,
        kind: e.kind(),
    })
}

/// Erase the sector at `offset` and program `bytes` into it
pub(crate) fn write_sector<F: NorFlash>(
    flash: &mut F,
    offset: u32,
    bytes: &[u8],
) -> PreferenceResult<()> {
    flash
        .erase(offset, offset + F::ERASE_SIZE as u32)
        .map_err(|e| PreferenceError::FlashErase {
            offset,
            kind: e.kind(),
        })?;
    flash.write(offset, bytes).map_err(|e| PreferenceError::FlashWrite {
        offset,
        kind: e.kind(),
    })
}

/// Erase the sector at `offset`
pub(crate) fn erase_sector<F: NorFlash>(flash: &mut F, offset: u32) -> PreferenceResult<()> {
    flash
        .erase(offset, offset + F::ERASE_SIZE as u32)
        .map_err(|e| PreferenceError::FlashErase {
            offset,
            kind: e.kind(),
        })
}
