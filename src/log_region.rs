#[allow(unused_imports)]
#[cfg(target_os = "none")]
use defmt::{debug, error, info, warn};
#[allow(unused_imports)]
#[cfg(not(target_os = "none"))]
use log::{debug, error, info, warn};

use crate::layout::LayoutEntry;
use crate::platform::Eeprom;
use crate::scheduler::{WriteOutcome, WriteScheduler};
use crate::store::StoreError;

/// Value of a log byte that was never written.
pub const ERASED: u8 = 0xff;

/// Bytes read per step of the cursor scan.
const SCAN_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum AppendOutcome {
    Accepted,
    /// The device is still busy with an earlier write, retry on a later cycle.
    Busy,
    /// The region is full. Stays that way for the rest of the session.
    Exhausted,
}

impl AppendOutcome {
    pub fn is_accepted(self) -> bool {
        self == AppendOutcome::Accepted
    }
}

/// Append cursor over the telemetry bytes behind the fixed fields.
pub struct TelemetryLog {
    start: u32,
    capacity: u32,
    cursor: u32,
}

impl TelemetryLog {
    pub fn new(region: LayoutEntry) -> Self {
        Self {
            start: region.address,
            capacity: region.width,
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.capacity
    }

    /// Finds the end of the written data: one past the last byte that is not
    /// erased. Erased bytes inside the data never move the cursor back.
    pub fn recover<D: Eeprom>(&mut self, scheduler: &mut WriteScheduler<D>) -> Result<u32, StoreError<D::Error>> {
        let mut buf = [0_u8; SCAN_CHUNK];
        let mut end = self.capacity;
        self.cursor = 0;
        while end > 0 {
            let to_read = end.min(SCAN_CHUNK as u32);
            let start = end - to_read;
            let slice = &mut buf[0..to_read as usize];

            scheduler.read_into(self.start + start, slice)?;

            if let Some(last) = slice.iter().rposition(|&c| c != ERASED) {
                self.cursor = start + last as u32 + 1;
                break;
            }
            end = start;
        }

        debug!("log cursor recovered at {} of {}", self.cursor, self.capacity);
        Ok(self.cursor)
    }

    /// Writes `value` at the cursor without blocking. [`ERASED`] is refused, a
    /// byte holding it would read as the end of the log after a restart.
    pub fn append<D: Eeprom>(
        &mut self,
        scheduler: &mut WriteScheduler<D>,
        value: u8,
    ) -> Result<AppendOutcome, StoreError<D::Error>> {
        if value == ERASED {
            return Err(StoreError::ErasedValue);
        }
        if self.is_exhausted() {
            return Ok(AppendOutcome::Exhausted);
        }
        match scheduler.try_write(self.start + self.cursor, value)? {
            WriteOutcome::Accepted => {
                self.cursor += 1;
                if self.is_exhausted() {
                    info!("telemetry log full after {} bytes", self.capacity);
                }
                Ok(AppendOutcome::Accepted)
            }
            WriteOutcome::Rejected => Ok(AppendOutcome::Busy),
        }
    }

    /// Copies written log bytes starting at `offset` into `buf`. Returns the
    /// number of bytes copied, 0 past the cursor.
    pub fn read<D: Eeprom>(
        &self,
        scheduler: &mut WriteScheduler<D>,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<usize, StoreError<D::Error>> {
        if offset >= self.cursor {
            return Ok(0);
        }
        let len = buf.len().min((self.cursor - offset) as usize);
        scheduler.read_into(self.start + offset, &mut buf[..len])?;
        Ok(len)
    }

    /// Erases the whole region with blocking writes and rewinds the cursor.
    pub fn erase<D: Eeprom>(&mut self, scheduler: &mut WriteScheduler<D>) -> Result<(), StoreError<D::Error>> {
        for offset in 0..self.capacity {
            scheduler.write(self.start + offset, ERASED)?;
        }
        self.cursor = 0;
        info!("telemetry log erased");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use embassy_time::Duration;

    use super::*;
    use crate::layout::Layout;
    use crate::platform::native::{MockEeprom, MockFault};

    fn setup(capacity: u32) -> (TelemetryLog, WriteScheduler<MockEeprom>) {
        let layout = Layout::new(capacity);
        let scheduler = WriteScheduler::new(MockEeprom::new(capacity), Duration::from_millis(20));
        (TelemetryLog::new(layout.log_region()), scheduler)
    }

    fn append_until_accepted(log: &mut TelemetryLog, s: &mut WriteScheduler<MockEeprom>, value: u8) {
        loop {
            match log.append(s, value).unwrap() {
                AppendOutcome::Accepted => return,
                AppendOutcome::Busy => continue,
                AppendOutcome::Exhausted => panic!("log exhausted"),
            }
        }
    }

    #[test]
    fn fills_to_capacity_then_refuses() {
        let (mut log, mut s) = setup(42);
        let capacity = log.capacity();
        assert_eq!(capacity, 32);

        for i in 0..capacity {
            assert_eq!(log.cursor(), i);
            append_until_accepted(&mut log, &mut s, i as u8);
            assert_eq!(log.cursor(), i + 1);
        }
        assert_eq!(log.append(&mut s, 0).unwrap(), AppendOutcome::Exhausted);
        assert_eq!(log.append(&mut s, 0).unwrap(), AppendOutcome::Exhausted);
        assert_eq!(log.cursor(), capacity);
    }

    #[test]
    fn busy_device_leaves_cursor_alone() {
        let (mut log, mut s) = setup(42);
        assert!(log.append(&mut s, 1).unwrap().is_accepted());
        assert_eq!(log.append(&mut s, 2).unwrap(), AppendOutcome::Busy);
        assert_eq!(log.cursor(), 1);
    }

    #[test]
    fn every_append_is_accepted_on_an_idle_device() {
        let (mut log, mut s) = setup(42);
        for i in 0..log.capacity() {
            // give the device time to finish the previous byte
            s.write(0, 0).unwrap();
            assert!(log.append(&mut s, i as u8).unwrap().is_accepted());
        }
        assert_eq!(log.append(&mut s, 0).unwrap(), AppendOutcome::Exhausted);
    }

    #[test]
    fn cursor_is_recovered_from_written_data() {
        let (mut log, mut s) = setup(1024);
        for i in 0..300_u32 {
            append_until_accepted(&mut log, &mut s, (i % 200) as u8);
        }
        let mut eeprom = s.release().restart();
        // erased-looking bytes inside the data are not the end, however many
        for offset in 100..140 {
            eeprom.poke(10 + offset, 0xff);
        }
        eeprom.poke(10 + 299, 0xff);
        eeprom.poke(10 + 298, 0x01);

        let layout = Layout::new(1024);
        let mut s = WriteScheduler::new(eeprom, Duration::from_millis(20));
        let mut recovered = TelemetryLog::new(layout.log_region());
        assert_eq!(recovered.recover(&mut s).unwrap(), 299);
    }

    #[test]
    fn recovery_never_lands_inside_the_data() {
        let (mut log, mut s) = setup(1024);
        for i in 0..600_u32 {
            append_until_accepted(&mut log, &mut s, (i % 250) as u8);
        }
        let mut eeprom = s.release().restart();
        for offset in 500..520 {
            eeprom.poke(10 + offset, 0xff);
        }

        let mut s = WriteScheduler::new(eeprom, Duration::from_millis(20));
        let mut recovered = TelemetryLog::new(Layout::new(1024).log_region());
        assert_eq!(recovered.recover(&mut s).unwrap(), 600);

        append_until_accepted(&mut recovered, &mut s, 0x42);
        s.write(0, 0).unwrap();
        assert_eq!(s.read(10 + 600).unwrap(), 0x42);
        assert_eq!(s.read(10 + 499).unwrap(), (499 % 250) as u8);
    }

    #[test]
    fn erased_value_is_refused() {
        let (mut log, mut s) = setup(64);
        assert_eq!(log.append(&mut s, ERASED), Err(StoreError::ErasedValue));
        assert_eq!(log.cursor(), 0);
        assert!(!s.is_faulted());
        assert_eq!(s.device().writes_started(), 0);
        assert!(log.append(&mut s, 0xfe).unwrap().is_accepted());
    }

    #[test]
    fn recovery_on_empty_and_full_regions() {
        let (mut log, mut s) = setup(64);
        assert_eq!(log.recover(&mut s).unwrap(), 0);

        for i in 0..log.capacity() {
            append_until_accepted(&mut log, &mut s, i as u8);
        }
        let eeprom = s.release().restart();
        let mut s = WriteScheduler::new(eeprom, Duration::from_millis(20));
        let mut recovered = TelemetryLog::new(Layout::new(64).log_region());
        assert_eq!(recovered.recover(&mut s).unwrap(), 54);
        assert!(recovered.is_exhausted());
    }

    #[test]
    fn read_stops_at_cursor() {
        let (mut log, mut s) = setup(64);
        for v in [7, 8, 9] {
            append_until_accepted(&mut log, &mut s, v);
        }
        s.write(0, 0).unwrap();

        let mut buf = [0_u8; 8];
        assert_eq!(log.read(&mut s, 0, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], &[7, 8, 9]);
        assert_eq!(log.read(&mut s, 2, &mut buf).unwrap(), 1);
        assert_eq!(buf[0], 9);
        assert_eq!(log.read(&mut s, 3, &mut buf).unwrap(), 0);
    }

    #[test]
    fn erase_rewinds() {
        let (mut log, mut s) = setup(64);
        for v in [1, 2, 3] {
            append_until_accepted(&mut log, &mut s, v);
        }
        log.erase(&mut s).unwrap();
        assert_eq!(log.cursor(), 0);
        assert!(s.device().image()[10..].iter().all(|&b| b == ERASED));
    }

    #[test]
    fn fault_surfaces_through_append() {
        let (mut log, s) = setup(64);
        let mut eeprom = s.release();
        eeprom.inject_fault(Some(MockFault::NotPresent));
        let mut s = WriteScheduler::new(eeprom, Duration::from_millis(20));
        assert!(log.append(&mut s, 1).is_err());
        assert_eq!(log.append(&mut s, 1), Err(StoreError::Unavailable));
        assert_eq!(log.cursor(), 0);
    }
}
