//! Serializes writes to the EEPROM.
//!
//! Only one write can be in flight on the device. [`WriteScheduler::write`]
//! waits for the device on both sides of the write, [`WriteScheduler::try_write`]
//! never waits and reports whether it issued the write. Between issuing a
//! non-blocking write and the device asserting busy, the write is tracked in
//! a single [`PendingWrite`] slot so it cannot be issued twice.

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
use embassy_time::{Duration, Instant};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::platform::Eeprom;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct PendingWrite {
    pub address: u32,
    pub value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum WriteOutcome {
    Accepted,
    /// The device was busy or a write is still pending, try again later.
    Rejected,
}

impl WriteOutcome {
    pub fn is_accepted(self) -> bool {
        self == WriteOutcome::Accepted
    }
}

pub struct WriteScheduler<D> {
    device: D,
    pending: Option<PendingWrite>,
    faulted: bool,
    timeout: Duration,
}

impl<D: Eeprom> WriteScheduler<D> {
    pub fn new(device: D, timeout: Duration) -> Self {
        Self {
            device,
            pending: None,
            faulted: false,
            timeout,
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn pending(&self) -> Option<PendingWrite> {
        self.pending
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn release(self) -> D {
        self.device
    }

    pub fn read(&mut self, address: u32) -> Result<u8, StoreError<D::Error>> {
        let mut buf = [0_u8; 1];
        self.read_into(address, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_into(&mut self, address: u32, buf: &mut [u8]) -> Result<(), StoreError<D::Error>> {
        self.check(address, buf.len())?;
        let result = self.device.read(address, buf).map_err(StoreError::from);
        self.latch(result)
    }

    /// Writes `value` and returns once it is committed.
    pub fn write(&mut self, address: u32, value: u8) -> Result<(), StoreError<D::Error>> {
        self.check(address, 1)?;
        let result = self.write_blocking(address, value);
        self.latch(result)
    }

    /// Issues `value` if the device is idle, without waiting.
    pub fn try_write(&mut self, address: u32, value: u8) -> Result<WriteOutcome, StoreError<D::Error>> {
        self.check(address, 1)?;
        let result = self.write_nonblocking(address, value);
        self.latch(result)
    }

    fn write_blocking(&mut self, address: u32, value: u8) -> Result<(), StoreError<D::Error>> {
        self.wait_idle()?;
        if self.device.read_byte(address)? == value {
            return Ok(());
        }
        self.device.start_write(address, value)?;
        self.wait_committed(address, value)
    }

    fn write_nonblocking(&mut self, address: u32, value: u8) -> Result<WriteOutcome, StoreError<D::Error>> {
        let busy = self.resolve_pending()?;
        if busy || self.pending.is_some() {
            return Ok(WriteOutcome::Rejected);
        }
        if self.device.read_byte(address)? == value {
            return Ok(WriteOutcome::Accepted);
        }
        self.device.start_write(address, value)?;
        self.pending = Some(PendingWrite { address, value });
        Ok(WriteOutcome::Accepted)
    }

    /// Polls the device and drops the pending write once the device took it
    /// over. Returns the busy flag.
    fn resolve_pending(&mut self) -> Result<bool, StoreError<D::Error>> {
        let busy = self.device.is_busy()?;
        if let Some(pending) = self.pending {
            // a pending write never holds the value the byte had before it,
            // so reading the new value back means it is committed
            if busy || self.device.read_byte(pending.address)? == pending.value {
                self.pending = None;
            }
        }
        Ok(busy)
    }

    fn wait_idle(&mut self) -> Result<(), StoreError<D::Error>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let busy = self.resolve_pending()?;
            if !busy && self.pending.is_none() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StoreError::Timeout);
            }
        }
    }

    fn wait_committed(&mut self, address: u32, value: u8) -> Result<(), StoreError<D::Error>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if !self.device.is_busy()? && self.device.read_byte(address)? == value {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(StoreError::Timeout);
            }
        }
    }

    fn check(&self, address: u32, len: usize) -> Result<(), StoreError<D::Error>> {
        if self.faulted {
            return Err(StoreError::Unavailable);
        }
        match (address as usize).checked_add(len) {
            Some(end) if end <= self.device.capacity() => Ok(()),
            _ => Err(StoreError::InvalidAddress(address)),
        }
    }

    fn latch<T>(&mut self, result: Result<T, StoreError<D::Error>>) -> Result<T, StoreError<D::Error>> {
        if let Err(e) = &result {
            if e.is_fault() && !self.faulted {
                error!("eeprom fault ({}), storage unavailable", e.code());
                self.faulted = true;
                self.pending = None;
            }
        }
        result
    }
}
