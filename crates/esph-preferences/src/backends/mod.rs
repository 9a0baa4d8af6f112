pub(crate) mod file;
pub(crate) mod flash_sector;
mod keyed;
pub(crate) mod memory;
pub(crate) mod nvs;
pub(crate) mod rtc_flash;
