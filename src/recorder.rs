//! Turns accelerometer samples into telemetry log bytes.
//!
//! Every sample is stored as its magnitude in tenths of g. The device takes
//! a few milliseconds per byte, so a sample that finds it busy is held and
//! retried on the next cycle; while one is held newer samples are dropped.

#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::calibration::{MaxG, RangeClass};
use crate::log_region::AppendOutcome;
use crate::platform::Eeprom;
use crate::store::{Store, StoreError};

/// Largest value a log byte takes. 0xff is what an erased byte reads as.
pub const MAX_SAMPLE: u8 = 0xfe;

pub struct Recorder {
    range: RangeClass,
    held: Option<u8>,
    peak_tenths: u32,
    recorded: u32,
    dropped: u32,
}

impl Recorder {
    pub fn new(range: RangeClass) -> Self {
        Self {
            range,
            held: None,
            peak_tenths: 0,
            recorded: 0,
            dropped: 0,
        }
    }

    pub fn peak(&self) -> MaxG {
        MaxG::from_tenths(self.peak_tenths)
    }

    pub fn recorded(&self) -> u32 {
        self.recorded
    }

    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Records one sample in device counts.
    pub fn record<D: Eeprom>(
        &mut self,
        store: &mut Store<D>,
        counts: [i16; 3],
    ) -> Result<AppendOutcome, StoreError<D::Error>> {
        let tenths = magnitude_tenths(counts, self.range);
        self.peak_tenths = self.peak_tenths.max(tenths);
        let sample = tenths.min(MAX_SAMPLE as u32) as u8;

        let (value, holding) = match self.held {
            Some(held) => (held, true),
            None => (sample, false),
        };

        let outcome = store.append_byte(value)?;
        match outcome {
            AppendOutcome::Accepted => {
                self.recorded += 1;
                // the device is busy with `value` now, keep the new sample for later
                self.held = if holding { Some(sample) } else { None };
            }
            AppendOutcome::Busy => {
                if holding {
                    self.dropped += 1;
                } else {
                    self.held = Some(sample);
                }
            }
            AppendOutcome::Exhausted => {
                self.held = None;
            }
        }
        Ok(outcome)
    }

    /// Raises the stored peak to this session's peak if it is higher.
    pub fn finish<D: Eeprom>(&self, store: &mut Store<D>) -> Result<MaxG, StoreError<D::Error>> {
        let stored = store.max_g()?;
        let peak = self.peak();
        if stored.is_valid() && stored.as_tenths() >= peak.as_tenths() {
            return Ok(stored);
        }
        store.set_max_g(peak)?;
        info!(
            "new peak {}.{} g, {} samples logged, {} dropped",
            peak.whole(),
            peak.tenths(),
            self.recorded,
            self.dropped
        );
        Ok(peak)
    }
}

/// Magnitude of `counts` in tenths of g, rounded.
pub fn magnitude_tenths(counts: [i16; 3], range: RangeClass) -> u32 {
    let sum_sq: u64 = counts.iter().map(|&c| (c as i64 * c as i64) as u64).sum();
    let tenth_counts = isqrt(sum_sq * 100);
    let per_g = range.counts_per_g() as u64;
    ((tenth_counts + per_g / 2) / per_g) as u32
}

fn isqrt(n: u64) -> u64 {
    if n < 2 {
        return n;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}
