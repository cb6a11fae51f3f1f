use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use embedded_storage::ReadStorage;

use super::{Accelerometer, Eeprom};
use crate::calibration::RangeClass;
use crate::layout::DEFAULT_CAPACITY;

pub type EepromType = MockEeprom;
pub type EepromError = MockEepromError;
pub type AccelerometerType = MockAccelerometer;
pub type AccelerometerError = MockAccelerometerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockEepromError {
    /// The device does not answer at all.
    NotPresent,
    OutOfRange,
    /// A write was issued while another one was still in flight.
    WriteWhileBusy,
}

/// Injected misbehaviour of [`MockEeprom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFault {
    NotPresent,
    /// Busy never clears.
    StuckBusy,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    address: u32,
    value: u8,
    latch_polls: u32,
    busy_polls: u32,
}

/// In-memory EEPROM. Time only advances when the busy flag is polled: a write
/// first stays invisible for `latch_polls` polls (busy not asserted yet), then
/// reports busy for `busy_polls` polls and commits on the poll after that.
#[derive(Debug, Clone)]
pub struct MockEeprom {
    memory: Vec<u8>,
    latch_polls: u32,
    busy_polls: u32,
    in_flight: Option<InFlight>,
    fault: Option<MockFault>,
    writes_started: u32,
}

impl MockEeprom {
    pub const ERASED: u8 = 0xff;

    pub fn new(capacity: u32) -> Self {
        Self::from_image(vec![Self::ERASED; capacity as usize])
    }

    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            memory: image,
            latch_polls: 0,
            busy_polls: 2,
            in_flight: None,
            fault: None,
            writes_started: 0,
        }
    }

    /// Loads the image saved by [`MockEeprom::save`], or a blank device if
    /// there is none yet.
    pub fn load(path: &Path, capacity: u32) -> io::Result<Self> {
        let mut image = match fs::read(path) {
            Ok(image) => image,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no eeprom image at {}, starting blank", path.display());
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        image.resize(capacity as usize, Self::ERASED);
        Ok(Self::from_image(image))
    }

    pub fn save(&mut self, path: &Path) -> io::Result<()> {
        self.settle();
        fs::write(path, &self.memory)
    }

    pub fn default_image_path() -> PathBuf {
        env::temp_dir().join("nvstore_eeprom.bin")
    }

    pub fn with_timing(mut self, latch_polls: u32, busy_polls: u32) -> Self {
        self.latch_polls = latch_polls;
        self.busy_polls = busy_polls;
        self
    }

    pub fn inject_fault(&mut self, fault: Option<MockFault>) {
        self.fault = fault;
    }

    /// Number of writes issued to the device so far.
    pub fn writes_started(&self) -> u32 {
        self.writes_started
    }

    /// Address and value of the write currently in flight.
    pub fn in_flight(&self) -> Option<(u32, u8)> {
        self.in_flight.map(|w| (w.address, w.value))
    }

    pub fn image(&self) -> &[u8] {
        &self.memory
    }

    pub fn poke(&mut self, address: u32, value: u8) {
        self.memory[address as usize] = value;
    }

    /// Lets the write in flight finish, as if enough time passed.
    pub fn settle(&mut self) {
        if let Some(write) = self.in_flight.take() {
            self.memory[write.address as usize] = write.value;
        }
    }

    /// Power cycle: pending writes complete, injected faults and counters reset.
    pub fn restart(mut self) -> Self {
        self.settle();
        let (latch_polls, busy_polls) = (self.latch_polls, self.busy_polls);
        Self::from_image(self.memory).with_timing(latch_polls, busy_polls)
    }

    fn check_present(&self) -> Result<(), MockEepromError> {
        match self.fault {
            Some(MockFault::NotPresent) => Err(MockEepromError::NotPresent),
            _ => Ok(()),
        }
    }
}

impl Default for MockEeprom {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ReadStorage for MockEeprom {
    type Error = MockEepromError;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.check_present()?;
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.memory.len() {
            return Err(MockEepromError::OutOfRange);
        }
        bytes.copy_from_slice(&self.memory[start..end]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.memory.len()
    }
}

impl Eeprom for MockEeprom {
    fn start_write(&mut self, address: u32, value: u8) -> Result<(), Self::Error> {
        self.check_present()?;
        if address as usize >= self.memory.len() {
            return Err(MockEepromError::OutOfRange);
        }
        if self.in_flight.is_some() || self.fault == Some(MockFault::StuckBusy) {
            return Err(MockEepromError::WriteWhileBusy);
        }
        self.in_flight = Some(InFlight {
            address,
            value,
            latch_polls: self.latch_polls,
            busy_polls: self.busy_polls,
        });
        self.writes_started += 1;
        Ok(())
    }

    fn is_busy(&mut self) -> Result<bool, Self::Error> {
        self.check_present()?;
        if self.fault == Some(MockFault::StuckBusy) {
            return Ok(true);
        }
        let Some(write) = self.in_flight.as_mut() else {
            return Ok(false);
        };
        if write.latch_polls > 0 {
            write.latch_polls -= 1;
            return Ok(false);
        }
        if write.busy_polls > 0 {
            write.busy_polls -= 1;
            return Ok(true);
        }
        self.settle();
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAccelerometerError {
    NotResponding,
}

/// Replays a fixed list of readings, offset by the configured bias.
pub struct MockAccelerometer {
    samples: Vec<[i16; 3]>,
    index: usize,
    bias: [i16; 3],
    range: Option<RangeClass>,
    responding: bool,
}

impl MockAccelerometer {
    pub fn new(samples: Vec<[i16; 3]>) -> Self {
        Self {
            samples,
            index: 0,
            bias: [0; 3],
            range: None,
            responding: true,
        }
    }

    /// A device lying flat with a constant offset on every axis.
    pub fn resting(range: RangeClass, offset: [i16; 3]) -> Self {
        let one_g = range.counts_per_g();
        Self::new(vec![[offset[0], offset[1], offset[2] + one_g]])
    }

    pub fn bias(&self) -> [i16; 3] {
        self.bias
    }

    pub fn range(&self) -> Option<RangeClass> {
        self.range
    }

    pub fn set_responding(&mut self, responding: bool) {
        self.responding = responding;
    }

    fn check(&self) -> Result<(), MockAccelerometerError> {
        if self.responding {
            Ok(())
        } else {
            Err(MockAccelerometerError::NotResponding)
        }
    }
}

impl Accelerometer<AccelerometerError> for AccelerometerType {
    async fn read_counts(&mut self) -> Result<[i16; 3], AccelerometerError> {
        self.check()?;
        if self.samples.is_empty() {
            return Ok([0; 3]);
        }
        let sample = self.samples[self.index % self.samples.len()];
        self.index += 1;
        Ok([
            sample[0].saturating_sub(self.bias[0]),
            sample[1].saturating_sub(self.bias[1]),
            sample[2].saturating_sub(self.bias[2]),
        ])
    }

    async fn set_bias(&mut self, bias: [i16; 3]) -> Result<(), AccelerometerError> {
        self.check()?;
        self.bias = bias;
        Ok(())
    }

    async fn set_range(&mut self, range: RangeClass) -> Result<(), AccelerometerError> {
        self.check()?;
        self.range = Some(range);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_commits_after_busy_window() {
        let mut eeprom = MockEeprom::new(16).with_timing(1, 2);
        eeprom.start_write(3, 0x42).unwrap();
        assert_eq!(eeprom.read_byte(3).unwrap(), 0xff);

        // latch, busy, busy, commit
        assert!(!eeprom.is_busy().unwrap());
        assert!(eeprom.is_busy().unwrap());
        assert!(eeprom.is_busy().unwrap());
        assert!(!eeprom.is_busy().unwrap());
        assert_eq!(eeprom.read_byte(3).unwrap(), 0x42);
        assert_eq!(eeprom.writes_started(), 1);
    }

    #[test]
    fn second_write_in_flight_is_an_error() {
        let mut eeprom = MockEeprom::new(16);
        eeprom.start_write(0, 1).unwrap();
        assert_eq!(eeprom.start_write(1, 2), Err(MockEepromError::WriteWhileBusy));
        assert_eq!(eeprom.in_flight(), Some((0, 1)));
    }

    #[test]
    fn missing_device_fails_everything() {
        let mut eeprom = MockEeprom::new(16);
        eeprom.inject_fault(Some(MockFault::NotPresent));
        assert_eq!(eeprom.read_byte(0), Err(MockEepromError::NotPresent));
        assert_eq!(eeprom.is_busy(), Err(MockEepromError::NotPresent));
        assert_eq!(eeprom.start_write(0, 0), Err(MockEepromError::NotPresent));
    }

    #[test]
    fn image_survives_save_and_load() {
        let path = env::temp_dir().join(format!("nvstore_mock_{}.bin", std::process::id()));
        let mut eeprom = MockEeprom::new(32);
        eeprom.start_write(5, 0x5a).unwrap();
        eeprom.save(&path).unwrap();

        let mut loaded = MockEeprom::load(&path, 32).unwrap();
        assert_eq!(loaded.read_byte(5).unwrap(), 0x5a);
        assert_eq!(loaded.read_byte(6).unwrap(), 0xff);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn accelerometer_applies_bias() {
        let mut acc = MockAccelerometer::resting(RangeClass::G2, [4, -2, 10]);
        embassy_futures::block_on(async {
            assert_eq!(acc.read_counts().await.unwrap(), [4, -2, 266]);
            acc.set_bias([4, -2, 10]).await.unwrap();
            assert_eq!(acc.read_counts().await.unwrap(), [0, 0, 256]);
        });
    }
}
