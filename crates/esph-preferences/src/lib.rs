//! Persistent preferences
//!
//! Components persist small fixed-size values (restored modes, counters,
//! calibration) through a [`PreferenceObject`] obtained from a
//! [`Preferences`] store:
//!
//! ```text
//! store.make_preference::<T>(key) → PreferenceObject → save(&T) / load(&mut T)
//! ```
//!
//! `save` only updates the store's in-memory view; data becomes durable on
//! the next [`Preferences::sync`], which the [`IntervalSyncer`] component
//! runs periodically and on shutdown. Every failure is reported as `false`
//! and logged; callers fall back to their defaults.
//!
//! # Backends
//!
//! - [`MemoryPreferences`] - volatile map, for tests and diskless hosts
//! - [`FilePreferences`] - single file on the host filesystem
//! - [`NvsPreferences`] - key/value flash store with its own integrity checks
//! - [`RtcFlashPreferences`] - retained RTC words plus a CRC-guarded flash sector
//! - [`FlashSectorPreferences`] - byte-packed flash sector with check bytes

mod backends;
mod error;
pub mod flash;
mod object;
mod preferences;
mod syncer;

pub use backends::file::FilePreferences;
pub use backends::flash_sector::{FlashSectorPreferences, FLASH_SECTOR_STORAGE_SIZE};
pub use backends::memory::MemoryPreferences;
pub use backends::nvs::{MemoryNvs, NvsPreferences, NvsStore};
pub use backends::rtc_flash::{RtcFlashPreferences, RtcMemory, RTC_FLASH_STORAGE_WORDS};
pub use error::{PreferenceError, PreferenceResult};
pub use object::{PreferenceBackend, PreferenceObject};
pub use preferences::{preference_key, Preferences, PreferencesExt};
pub use syncer::IntervalSyncer;
