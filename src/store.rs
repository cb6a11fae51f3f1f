#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::calibration::{self, CalibrationRecord, MaxG, RangeClass};
use crate::config::StoreConfig;
use crate::gate::{Gate, GateOutcome, GateState};
use crate::layout::{join_i16, split_i16, Field, Layout, LayoutEntry};
use crate::log_region::{AppendOutcome, TelemetryLog};
use crate::platform::Eeprom;
use crate::scheduler::{PendingWrite, WriteOutcome, WriteScheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum StoreError<E> {
    /// The device reported an error. The store is unavailable afterwards.
    Device(E),
    /// The device stayed busy past the write timeout.
    Timeout,
    /// An earlier device fault made the store unusable for this session.
    Unavailable,
    /// The magic byte has not been checked yet.
    NotReady,
    InvalidAddress(u32),
    /// The address belongs to the magic byte or the telemetry log.
    ProtectedAddress(u32),
    /// The field does not have the width the accessor expects.
    InvalidField(Field),
    /// 0xff cannot be logged, it marks the end of the written data.
    ErasedValue,
}

impl<E> From<E> for StoreError<E> {
    fn from(err: E) -> Self {
        StoreError::Device(err)
    }
}

impl<E> StoreError<E> {
    /// Whether the error makes the store unavailable for the session.
    pub fn is_fault(&self) -> bool {
        matches!(self, StoreError::Device(_) | StoreError::Timeout | StoreError::Unavailable)
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Device(_) => "device_fault",
            StoreError::Timeout => "timeout",
            StoreError::Unavailable => "unavailable",
            StoreError::NotReady => "not_ready",
            StoreError::InvalidAddress(_) => "invalid_address",
            StoreError::ProtectedAddress(_) => "protected_address",
            StoreError::InvalidField(_) => "invalid_field",
            StoreError::ErasedValue => "erased_value",
        }
    }
}

impl<E: core::fmt::Debug> core::fmt::Display for StoreError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StoreError::Device(e) => write!(f, "device error: {:?}", e),
            StoreError::InvalidAddress(a) | StoreError::ProtectedAddress(a) => write!(f, "{} at {}", self.code(), a),
            StoreError::InvalidField(field) => write!(f, "{} {:?}", self.code(), field),
            _ => f.write_str(self.code()),
        }
    }
}

/// EEPROM backed configuration and telemetry store.
///
/// Call [`Store::init`] once at startup. Every other accessor fails with
/// [`StoreError::NotReady`] until it succeeded, and with
/// [`StoreError::Unavailable`] once the device has failed.
pub struct Store<D: Eeprom> {
    layout: Layout,
    gate: Gate,
    scheduler: WriteScheduler<D>,
    log: TelemetryLog,
    config: StoreConfig,
}

impl<D: Eeprom> Store<D> {
    pub fn new(device: D, config: StoreConfig) -> Self {
        let layout = Layout::new(device.capacity() as u32);
        let log = TelemetryLog::new(layout.log_region());
        Self {
            scheduler: WriteScheduler::new(device, config.write_timeout),
            gate: Gate::new(),
            layout,
            log,
            config,
        }
    }

    /// Checks the magic byte, reinitializes the fixed fields if needed and
    /// recovers the log cursor.
    pub fn init(&mut self) -> Result<GateOutcome, StoreError<D::Error>> {
        let result = self
            .gate
            .open(&mut self.scheduler, &self.layout, &mut self.log, &self.config);
        let outcome = self.track(result)?;

        let result = self.log.recover(&mut self.scheduler);
        let cursor = self.track(result)?;

        info!(
            "store ready, log {} of {} bytes used",
            cursor,
            self.log.capacity()
        );
        Ok(outcome)
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == GateState::Ready
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pending_write(&self) -> Option<PendingWrite> {
        self.scheduler.pending()
    }

    pub fn device(&self) -> &D {
        self.scheduler.device()
    }

    pub fn release(self) -> D {
        self.scheduler.release()
    }

    pub fn read_byte(&mut self, address: u32) -> Result<u8, StoreError<D::Error>> {
        self.ensure_ready()?;
        let result = self.scheduler.read(address);
        self.track(result)
    }

    /// Blocking write of a raw byte. The magic byte and the log cannot be
    /// written, log bytes go through [`Store::append_byte`].
    pub fn write_byte(&mut self, address: u32, value: u8) -> Result<(), StoreError<D::Error>> {
        self.ensure_ready()?;
        self.check_writable(address)?;
        let result = self.scheduler.write(address, value);
        self.track(result)
    }

    /// Non-blocking write of a raw byte. Same restrictions as
    /// [`Store::write_byte`].
    pub fn try_write_byte(&mut self, address: u32, value: u8) -> Result<WriteOutcome, StoreError<D::Error>> {
        self.ensure_ready()?;
        self.check_writable(address)?;
        let result = self.scheduler.try_write(address, value);
        self.track(result)
    }

    pub fn read_u8(&mut self, field: Field) -> Result<u8, StoreError<D::Error>> {
        let entry = self.field_entry(field, 1)?;
        self.read_byte(entry.address)
    }

    pub fn write_u8(&mut self, field: Field, value: u8) -> Result<(), StoreError<D::Error>> {
        let entry = self.field_entry(field, 1)?;
        self.write_byte(entry.address, value)
    }

    pub fn try_write_u8(&mut self, field: Field, value: u8) -> Result<WriteOutcome, StoreError<D::Error>> {
        let entry = self.field_entry(field, 1)?;
        self.try_write_byte(entry.address, value)
    }

    pub fn read_i16(&mut self, field: Field) -> Result<i16, StoreError<D::Error>> {
        let entry = self.field_entry(field, 2)?;
        self.ensure_ready()?;
        let mut bytes = [0_u8; 2];
        let result = self.scheduler.read_into(entry.address, &mut bytes);
        self.track(result)?;
        Ok(join_i16(bytes))
    }

    /// Blocking write of a 16-bit field, most significant byte first.
    pub fn write_i16(&mut self, field: Field, value: i16) -> Result<(), StoreError<D::Error>> {
        let entry = self.field_entry(field, 2)?;
        let [msb, lsb] = split_i16(value);
        self.write_byte(entry.address, msb)?;
        self.write_byte(entry.address + 1, lsb)
    }

    pub fn calibration_bias(&mut self) -> Result<[i16; 3], StoreError<D::Error>> {
        Ok(self.calibration_record()?.bias)
    }

    pub fn set_calibration_bias(&mut self, bias: [i16; 3]) -> Result<(), StoreError<D::Error>> {
        self.write_i16(Field::BiasX, bias[0])?;
        self.write_i16(Field::BiasY, bias[1])?;
        self.write_i16(Field::BiasZ, bias[2])
    }

    /// Range class code of the accelerometer, see [`RangeClass::from_code`].
    pub fn configured_range(&mut self) -> Result<u8, StoreError<D::Error>> {
        self.read_u8(Field::Config)
    }

    pub fn set_configured_range(&mut self, range: RangeClass) -> Result<(), StoreError<D::Error>> {
        self.write_u8(Field::Config, range.code())
    }

    pub fn max_g(&mut self) -> Result<MaxG, StoreError<D::Error>> {
        Ok(MaxG::from_byte(self.read_u8(Field::MaxG)?))
    }

    pub fn set_max_g(&mut self, max_g: MaxG) -> Result<(), StoreError<D::Error>> {
        self.write_u8(Field::MaxG, max_g.to_byte())
    }

    /// Reads every calibration field, or nothing at all.
    pub fn calibration_record(&mut self) -> Result<CalibrationRecord, StoreError<D::Error>> {
        self.ensure_ready()?;
        let result = calibration::read_record(&mut self.scheduler, &self.layout);
        self.track(result)
    }

    pub fn set_calibration_record(&mut self, record: &CalibrationRecord) -> Result<(), StoreError<D::Error>> {
        self.ensure_ready()?;
        let result = calibration::write_record(&mut self.scheduler, &self.layout, record);
        self.track(result)
    }

    /// Appends one telemetry byte without blocking.
    pub fn append_byte(&mut self, value: u8) -> Result<AppendOutcome, StoreError<D::Error>> {
        self.ensure_ready()?;
        let result = self.log.append(&mut self.scheduler, value);
        self.track(result)
    }

    pub fn log_cursor(&self) -> u32 {
        self.log.cursor()
    }

    pub fn log_capacity(&self) -> u32 {
        self.log.capacity()
    }

    pub fn read_log(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, StoreError<D::Error>> {
        self.ensure_ready()?;
        let result = self.log.read(&mut self.scheduler, offset, buf);
        self.track(result)
    }

    pub fn erase_log(&mut self) -> Result<(), StoreError<D::Error>> {
        self.ensure_ready()?;
        let result = self.log.erase(&mut self.scheduler);
        self.track(result)
    }

    /// Fails unless [`Store::init`] succeeded and no fault occurred since.
    pub fn ensure_ready(&self) -> Result<(), StoreError<D::Error>> {
        if self.scheduler.is_faulted() {
            return Err(StoreError::Unavailable);
        }
        self.gate.require_ready()
    }

    fn check_writable(&self, address: u32) -> Result<(), StoreError<D::Error>> {
        match self.layout.field_at(address) {
            Some(Field::Magic | Field::Log) => Err(StoreError::ProtectedAddress(address)),
            Some(_) => Ok(()),
            None => Err(StoreError::InvalidAddress(address)),
        }
    }

    fn field_entry(&self, field: Field, width: u32) -> Result<LayoutEntry, StoreError<D::Error>> {
        let entry = self.layout.entry(field);
        if entry.width != width {
            return Err(StoreError::InvalidField(field));
        }
        Ok(entry)
    }

    fn track<T>(&mut self, result: Result<T, StoreError<D::Error>>) -> Result<T, StoreError<D::Error>> {
        if let Err(e) = &result {
            if e.is_fault() {
                self.gate.mark_faulted();
            }
        }
        result
    }
}
