use embassy_time::Duration;

use crate::calibration::CalibrationRecord;

/// Tunables of a [`crate::Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Longest a blocking write may wait for the device before it is
    /// declared faulty.
    pub write_timeout: Duration,
    /// Erase the log region when the magic byte did not match.
    pub erase_log_on_reinit: bool,
    /// Values written to the fixed fields when the store is reinitialized.
    pub defaults: CalibrationRecord,
}

impl StoreConfig {
    // a byte write takes 3.3 ms on AVR parts and 5 ms on 24Cxx parts
    pub const WRITE_TIMEOUT: Duration = Duration::from_millis(20);

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_timeout: Self::WRITE_TIMEOUT,
            erase_log_on_reinit: true,
            defaults: CalibrationRecord::DEFAULT,
        }
    }
}
