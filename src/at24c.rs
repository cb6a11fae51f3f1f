//! Driver for 24Cxx I2C EEPROMs up to 16 kbit (24C01 .. 24C16).
//!
//! These parts use a single word address byte; bits 8..10 of the memory
//! address go into the low bits of the device address. While a write cycle
//! runs the chip does not acknowledge its address, which is how
//! [`Eeprom::is_busy`] is implemented.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use embedded_storage::ReadStorage;

use crate::platform::Eeprom;

/// Base device address with all address pins low.
pub const DEFAULT_ADDRESS: u8 = 0x50;

/// Largest capacity addressable with one word address byte plus three block bits.
pub const MAX_CAPACITY: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum At24cError<BusError> {
    Bus(BusError),
    OutOfRange,
}

impl<BusError> From<BusError> for At24cError<BusError> {
    fn from(err: BusError) -> Self {
        At24cError::Bus(err)
    }
}

pub struct At24c<Bus> {
    bus: Bus,
    address: u8,
    capacity: u32,
}

impl<Bus: I2c> At24c<Bus> {
    /// `capacity` in bytes, at most [`MAX_CAPACITY`].
    pub fn new(bus: Bus, address: u8, capacity: u32) -> Self {
        Self {
            bus,
            address,
            capacity: capacity.min(MAX_CAPACITY),
        }
    }

    pub fn release(self) -> Bus {
        self.bus
    }

    #[inline]
    fn device_address(&self, offset: u32) -> u8 {
        self.address | ((offset >> 8) & 0x07) as u8
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<(), At24cError<Bus::Error>> {
        match (offset as usize).checked_add(len) {
            Some(end) if end <= self.capacity as usize => Ok(()),
            _ => Err(At24cError::OutOfRange),
        }
    }
}

impl<Bus: I2c> ReadStorage for At24c<Bus> {
    type Error = At24cError<Bus::Error>;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(offset, bytes.len())?;
        // sequential reads wrap inside a 256 byte block, so split at block edges
        let mut done = 0;
        while done < bytes.len() {
            let at = offset + done as u32;
            let in_block = 256 - (at & 0xff) as usize;
            let len = in_block.min(bytes.len() - done);
            let device = self.device_address(at);
            self.bus.write_read(device, &[at as u8], &mut bytes[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity as usize
    }
}

impl<Bus: I2c> Eeprom for At24c<Bus> {
    fn start_write(&mut self, address: u32, value: u8) -> Result<(), Self::Error> {
        self.check_range(address, 1)?;
        let device = self.device_address(address);
        self.bus.write(device, &[address as u8, value])?;
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, Self::Error> {
        let mut buf = [0_u8; 1];
        match self.bus.read(self.address, &mut buf) {
            Ok(()) => Ok(false),
            Err(e) if matches!(e.kind(), ErrorKind::NoAcknowledge(_)) => Ok(true),
            Err(e) => Err(At24cError::Bus(e)),
        }
    }
}
