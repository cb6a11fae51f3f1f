#![allow(dead_code)]

#[cfg(target_os = "none")]
mod embedded;
#[cfg(target_os = "none")]
pub use embedded::*;

#[cfg(not(target_os = "none"))]
pub mod native;
#[cfg(not(target_os = "none"))]
pub use native::*;

use embedded_storage::ReadStorage;

use crate::calibration::RangeClass;

/// Byte addressable non-volatile memory with a single write in flight.
///
/// Reads come from [`ReadStorage`]. A write is started with
/// [`Eeprom::start_write`] and stays in flight until [`Eeprom::is_busy`]
/// stops reporting it. Any error is treated as a device fault by the store.
pub trait Eeprom: ReadStorage {
    /// Issue a single byte write. Returns once the device took the request,
    /// not when the byte is committed.
    fn start_write(&mut self, address: u32, value: u8) -> Result<(), Self::Error>;

    /// True while a previously issued write has not committed yet.
    fn is_busy(&mut self) -> Result<bool, Self::Error>;

    fn read_byte(&mut self, address: u32) -> Result<u8, Self::Error> {
        let mut buf = [0_u8; 1];
        self.read(address, &mut buf)?;
        Ok(buf[0])
    }
}

/// The parts of the accelerometer the store configures.
pub trait Accelerometer<E> {
    /// Three axis reading in device counts, after the device's own offset
    /// compensation with the bias from [`Accelerometer::set_bias`].
    async fn read_counts(&mut self) -> Result<[i16; 3], E>;
    async fn set_bias(&mut self, bias: [i16; 3]) -> Result<(), E>;
    async fn set_range(&mut self, range: RangeClass) -> Result<(), E>;
}
