//! Startup check of the magic byte.
//!
//! Until the gate is [`GateState::Ready`] nothing read from the EEPROM can be
//! trusted, so the typed accessors of [`crate::Store`] refuse to run.

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::calibration;
use crate::config::StoreConfig;
use crate::layout::{Field, Layout, MAGIC};
use crate::log_region::TelemetryLog;
use crate::platform::Eeprom;
use crate::scheduler::WriteScheduler;
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum GateState {
    Uninitialized,
    /// The magic byte did not match, defaults are being written.
    Invalid,
    Ready,
    /// The device failed, nothing is attempted for the rest of the session.
    Faulted,
}

impl GateState {
    pub fn as_str(self) -> &'static str {
        match self {
            GateState::Uninitialized => "uninitialized",
            GateState::Invalid => "invalid",
            GateState::Ready => "ready",
            GateState::Faulted => "faulted",
        }
    }
}

/// How the gate reached [`GateState::Ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum GateOutcome {
    /// The magic byte matched.
    Verified,
    /// The magic byte was missing or wrong and the fixed fields were reset.
    Reinitialized,
}

pub struct Gate {
    state: GateState,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            state: GateState::Uninitialized,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn require_ready<E>(&self) -> Result<(), StoreError<E>> {
        match self.state {
            GateState::Ready => Ok(()),
            GateState::Faulted => Err(StoreError::Unavailable),
            GateState::Uninitialized | GateState::Invalid => Err(StoreError::NotReady),
        }
    }

    pub fn mark_faulted(&mut self) {
        self.state = GateState::Faulted;
    }

    /// Reads the magic byte and reinitializes the store when it does not match.
    pub fn open<D: Eeprom>(
        &mut self,
        scheduler: &mut WriteScheduler<D>,
        layout: &Layout,
        log: &mut TelemetryLog,
        config: &StoreConfig,
    ) -> Result<GateOutcome, StoreError<D::Error>> {
        match self.state {
            GateState::Ready => return Ok(GateOutcome::Verified),
            GateState::Faulted => return Err(StoreError::Unavailable),
            GateState::Uninitialized | GateState::Invalid => {}
        }

        let result = self.validate(scheduler, layout, log, config);
        if result.is_err() {
            self.state = GateState::Faulted;
        }
        result
    }

    fn validate<D: Eeprom>(
        &mut self,
        scheduler: &mut WriteScheduler<D>,
        layout: &Layout,
        log: &mut TelemetryLog,
        config: &StoreConfig,
    ) -> Result<GateOutcome, StoreError<D::Error>> {
        let magic_address = layout.entry(Field::Magic).address;
        let magic = scheduler.read(magic_address)?;
        if magic == MAGIC {
            self.state = GateState::Ready;
            info!("eeprom contents verified");
            return Ok(GateOutcome::Verified);
        }

        warn!("magic byte is {:#x}, expected {:#x}; reinitializing eeprom", magic, MAGIC);
        self.state = GateState::Invalid;

        calibration::write_record(scheduler, layout, &config.defaults)?;
        scheduler.write(layout.entry(Field::Reserved).address, 0)?;
        if config.erase_log_on_reinit {
            log.erase(scheduler)?;
        }
        // magic goes last so an interrupted initialization is redone on the next boot
        scheduler.write(magic_address, MAGIC)?;

        self.state = GateState::Ready;
        info!("eeprom reinitialized with defaults");
        Ok(GateOutcome::Reinitialized)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
