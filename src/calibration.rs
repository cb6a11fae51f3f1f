//! Accelerometer calibration kept in the fixed EEPROM fields.

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::layout::{join_i16, split_i16, Field, Layout};
use crate::platform::{Accelerometer, Eeprom};
use crate::scheduler::WriteScheduler;
use crate::store::{Store, StoreError};

/// Measurement range of the accelerometer, stored as the register code of
/// the range select register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
#[repr(u8)]
pub enum RangeClass {
    G2 = 0x03,
    G4 = 0x05,
    G8 = 0x08,
    G16 = 0x0C,
}

impl RangeClass {
    pub const DEFAULT: RangeClass = RangeClass::G2;

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x03 => Some(RangeClass::G2),
            0x05 => Some(RangeClass::G4),
            0x08 => Some(RangeClass::G8),
            0x0C => Some(RangeClass::G16),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Counts of the 10-bit output per g.
    pub fn counts_per_g(self) -> i16 {
        match self {
            RangeClass::G2 => 256,
            RangeClass::G4 => 128,
            RangeClass::G8 => 64,
            RangeClass::G16 => 32,
        }
    }

    pub fn full_scale_g(self) -> u8 {
        match self {
            RangeClass::G2 => 2,
            RangeClass::G4 => 4,
            RangeClass::G8 => 8,
            RangeClass::G16 => 16,
        }
    }
}

/// Peak acceleration as stored: `0xAB` reads as A.B g.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct MaxG(u8);

impl MaxG {
    pub const ZERO: MaxG = MaxG(0);
    /// 15.9 g
    pub const MAX: MaxG = MaxG(0xF9);

    pub fn from_byte(byte: u8) -> Self {
        MaxG(byte)
    }

    pub fn to_byte(self) -> u8 {
        self.0
    }

    /// Clamps to 15.9 g.
    pub fn from_tenths(tenths: u32) -> Self {
        let tenths = tenths.min(159);
        MaxG((((tenths / 10) << 4) | (tenths % 10)) as u8)
    }

    /// Rounds to the nearest tenth and clamps to 0.0 ..= 15.9 g.
    pub fn from_g(g: f32) -> Self {
        if !(g > 0.0) {
            return MaxG::ZERO;
        }
        let tenths = g * 10.0 + 0.5;
        if tenths >= 160.0 {
            return MaxG::MAX;
        }
        Self::from_tenths(tenths as u32)
    }

    pub fn whole(self) -> u8 {
        self.0 >> 4
    }

    pub fn tenths(self) -> u8 {
        self.0 & 0x0f
    }

    pub fn as_tenths(self) -> u32 {
        self.whole() as u32 * 10 + self.tenths() as u32
    }

    /// The low nibble is a decimal digit.
    pub fn is_valid(self) -> bool {
        self.tenths() <= 9
    }
}

/// Contents of the fixed fields behind the magic byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct CalibrationRecord {
    pub bias: [i16; 3],
    /// Range class code, see [`RangeClass::from_code`].
    pub range: u8,
    pub max_g: MaxG,
}

impl CalibrationRecord {
    pub const DEFAULT: CalibrationRecord = CalibrationRecord {
        bias: [0; 3],
        range: RangeClass::DEFAULT as u8,
        max_g: MaxG::ZERO,
    };

    /// The stored range, or the default one if the code is unknown.
    pub fn range_class(&self) -> RangeClass {
        RangeClass::from_code(self.range).unwrap_or(RangeClass::DEFAULT)
    }
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const BIAS_FIELDS: [Field; 3] = [Field::BiasX, Field::BiasY, Field::BiasZ];

pub(crate) fn write_record<D: Eeprom>(
    scheduler: &mut WriteScheduler<D>,
    layout: &Layout,
    record: &CalibrationRecord,
) -> Result<(), StoreError<D::Error>> {
    scheduler.write(layout.entry(Field::Config).address, record.range)?;
    scheduler.write(layout.entry(Field::MaxG).address, record.max_g.to_byte())?;
    for (field, value) in BIAS_FIELDS.into_iter().zip(record.bias) {
        let address = layout.entry(field).address;
        let [msb, lsb] = split_i16(value);
        scheduler.write(address, msb)?;
        scheduler.write(address + 1, lsb)?;
    }
    Ok(())
}

pub(crate) fn read_record<D: Eeprom>(
    scheduler: &mut WriteScheduler<D>,
    layout: &Layout,
) -> Result<CalibrationRecord, StoreError<D::Error>> {
    let range = scheduler.read(layout.entry(Field::Config).address)?;
    let max_g = MaxG::from_byte(scheduler.read(layout.entry(Field::MaxG).address)?);
    let mut bias = [0_i16; 3];
    for (field, value) in BIAS_FIELDS.into_iter().zip(bias.iter_mut()) {
        let mut bytes = [0_u8; 2];
        scheduler.read_into(layout.entry(field).address, &mut bytes)?;
        *value = join_i16(bytes);
    }
    Ok(CalibrationRecord { bias, range, max_g })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum CalibrationError<StoreErr, SensorErr> {
    Store(StoreError<StoreErr>),
    Sensor(SensorErr),
    /// Calibration was asked to average zero samples.
    NoSamples,
}

impl<StoreErr, SensorErr> From<StoreError<StoreErr>> for CalibrationError<StoreErr, SensorErr> {
    fn from(err: StoreError<StoreErr>) -> Self {
        CalibrationError::Store(err)
    }
}

/// Configures the accelerometer with the stored range and bias.
pub async fn apply_calibration<D, A, AE>(
    store: &mut Store<D>,
    acc: &mut A,
) -> Result<CalibrationRecord, CalibrationError<D::Error, AE>>
where
    D: Eeprom,
    A: Accelerometer<AE>,
{
    let record = store.calibration_record()?;
    let range = record.range_class();
    if range.code() != record.range {
        warn!("unknown range code {:#x}, using default", record.range);
    }
    acc.set_range(range).await.map_err(CalibrationError::Sensor)?;
    acc.set_bias(record.bias).await.map_err(CalibrationError::Sensor)?;
    Ok(record)
}

/// Measures the bias with the device lying flat, z axis up, stores it and
/// applies it. Returns the new bias.
pub async fn calibrate<D, A, AE>(
    store: &mut Store<D>,
    acc: &mut A,
    samples: usize,
) -> Result<[i16; 3], CalibrationError<D::Error, AE>>
where
    D: Eeprom,
    A: Accelerometer<AE>,
{
    if samples == 0 {
        return Err(CalibrationError::NoSamples);
    }
    let range = RangeClass::from_code(store.configured_range()?).unwrap_or(RangeClass::DEFAULT);
    acc.set_range(range).await.map_err(CalibrationError::Sensor)?;
    acc.set_bias([0; 3]).await.map_err(CalibrationError::Sensor)?;

    let mut sum = [0_i64; 3];
    for _ in 0..samples {
        let counts = acc.read_counts().await.map_err(CalibrationError::Sensor)?;
        for (s, c) in sum.iter_mut().zip(counts) {
            *s += c as i64;
        }
    }

    let n = samples as i64;
    let mut bias = sum.map(|s| clamp_i16(div_round(s, n)));
    bias[2] = clamp_i16(bias[2] as i64 - range.counts_per_g() as i64);

    store.set_calibration_bias(bias)?;
    acc.set_bias(bias).await.map_err(CalibrationError::Sensor)?;
    info!("calibrated over {} samples, bias {} {} {}", samples, bias[0], bias[1], bias[2]);
    Ok(bias)
}

/// Division rounding half away from zero.
fn div_round(value: i64, divisor: i64) -> i64 {
    if value >= 0 {
        (value + divisor / 2) / divisor
    } else {
        (value - divisor / 2) / divisor
    }
}

fn clamp_i16(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use super::*;
    use crate::config::StoreConfig;
    use crate::platform::native::{MockAccelerometer, MockAccelerometerError, MockEeprom};

    fn ready_store() -> Store<MockEeprom> {
        let mut store = Store::new(MockEeprom::default(), StoreConfig::default());
        store.init().unwrap();
        store
    }

    #[test]
    fn range_codes() {
        for range in [RangeClass::G2, RangeClass::G4, RangeClass::G8, RangeClass::G16] {
            assert_eq!(RangeClass::from_code(range.code()), Some(range));
            assert_eq!(range.counts_per_g() as i32 * range.full_scale_g() as i32, 512);
        }
        assert_eq!(RangeClass::G16.code(), 0x0c);
        assert_eq!(RangeClass::from_code(0x00), None);
    }

    #[test]
    fn max_g_nibbles() {
        let g = MaxG::from_byte(0x73);
        assert_eq!((g.whole(), g.tenths()), (7, 3));
        assert_eq!(g.as_tenths(), 73);
        assert!(g.is_valid());
        assert!(!MaxG::from_byte(0x1a).is_valid());

        assert_eq!(MaxG::from_g(2.45).to_byte(), 0x25);
        assert_eq!(MaxG::from_g(0.04), MaxG::ZERO);
        assert_eq!(MaxG::from_g(-3.0), MaxG::ZERO);
        assert_eq!(MaxG::from_g(f32::NAN), MaxG::ZERO);
        assert_eq!(MaxG::from_g(15.9), MaxG::MAX);
        assert_eq!(MaxG::from_g(40.0), MaxG::MAX);
        assert_eq!(MaxG::from_tenths(1000), MaxG::MAX);
    }

    #[test]
    fn rounding_is_symmetric() {
        assert_eq!(div_round(7, 2), 4);
        assert_eq!(div_round(-7, 2), -4);
        assert_eq!(div_round(10, 4), 3);
        assert_eq!(div_round(9, 4), 2);
        assert_eq!(div_round(-9, 4), -2);
    }

    #[test]
    fn record_round_trip() {
        let mut store = ready_store();
        let record = CalibrationRecord {
            bias: [-1, 2, i16::MIN],
            range: RangeClass::G4.code(),
            max_g: MaxG::from_byte(0x95),
        };
        store.set_calibration_record(&record).unwrap();
        assert_eq!(store.calibration_record().unwrap(), record);
    }

    #[test]
    fn calibrate_stores_and_applies_bias() {
        let mut store = ready_store();
        store.set_configured_range(RangeClass::G4).unwrap();
        let mut acc = MockAccelerometer::resting(RangeClass::G4, [12, -5, 30]);

        let bias = block_on(calibrate(&mut store, &mut acc, 16)).unwrap();
        assert_eq!(bias, [12, -5, 30]);
        assert_eq!(store.calibration_bias().unwrap(), [12, -5, 30]);
        assert_eq!(acc.bias(), [12, -5, 30]);
        assert_eq!(acc.range(), Some(RangeClass::G4));
        assert_eq!(block_on(acc.read_counts()).unwrap(), [0, 0, 128]);
    }

    #[test]
    fn calibrate_averages_noisy_samples() {
        let mut store = ready_store();
        let mut acc = MockAccelerometer::new(vec![[10, 0, 256], [11, -1, 258], [12, -2, 257], [11, -1, 259]]);
        let bias = block_on(calibrate(&mut store, &mut acc, 4)).unwrap();
        // x 44/4, y -4/4, z 1030/4 rounded minus one g
        assert_eq!(bias, [11, -1, 2]);
    }

    #[test]
    fn apply_pushes_stored_values() {
        let mut store = ready_store();
        store.set_calibration_bias([3, 4, 5]).unwrap();
        store.set_configured_range(RangeClass::G16).unwrap();
        let mut acc = MockAccelerometer::new(vec![]);

        let record = block_on(apply_calibration(&mut store, &mut acc)).unwrap();
        assert_eq!(record.bias, [3, 4, 5]);
        assert_eq!(acc.bias(), [3, 4, 5]);
        assert_eq!(acc.range(), Some(RangeClass::G16));
    }

    #[test]
    fn unknown_range_code_falls_back() {
        let mut store = ready_store();
        store.write_u8(Field::Config, 0x42).unwrap();
        let mut acc = MockAccelerometer::new(vec![]);
        block_on(apply_calibration(&mut store, &mut acc)).unwrap();
        assert_eq!(acc.range(), Some(RangeClass::DEFAULT));
    }

    #[test]
    fn failures_are_reported() {
        let mut store = ready_store();
        let mut acc = MockAccelerometer::resting(RangeClass::G2, [0; 3]);
        assert_eq!(
            block_on(calibrate(&mut store, &mut acc, 0)),
            Err(CalibrationError::NoSamples)
        );

        acc.set_responding(false);
        assert_eq!(
            block_on(calibrate(&mut store, &mut acc, 4)),
            Err(CalibrationError::Sensor(MockAccelerometerError::NotResponding))
        );
        assert_eq!(store.calibration_bias().unwrap(), [0; 3]);

        let mut fresh = Store::new(MockEeprom::default(), StoreConfig::default());
        assert_eq!(
            block_on(apply_calibration(&mut fresh, &mut acc)),
            Err(CalibrationError::Store(StoreError::NotReady))
        );
    }
}
