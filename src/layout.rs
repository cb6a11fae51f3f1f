//! Address map of the EEPROM.
//!
//! ```text
//!  offset  field        width
//!  0       magic        1      0xA3 when the contents are trusted
//!  1       config       1      accelerometer range class code
//!  2       max g        1      0xAB = A.B g
//!  3       bias x       2      i16, MSB first
//!  5       bias y       2      i16, MSB first
//!  7       bias z       2      i16, MSB first
//!  9       reserved     1
//!  10..    log          rest   opaque telemetry bytes
//! ```

/// Expected value of the magic byte. Change it whenever the layout changes.
pub const MAGIC: u8 = 0xA3;

/// Capacity of the EEPROM the layout was designed for.
pub const DEFAULT_CAPACITY: u32 = 1024;

/// First address of the telemetry log region.
pub const LOG_START: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub enum Field {
    Magic,
    Config,
    MaxG,
    BiasX,
    BiasY,
    BiasZ,
    Reserved,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(target_os = "none", derive(defmt::Format))]
pub struct LayoutEntry {
    pub field: Field,
    pub address: u32,
    pub width: u32,
}

impl LayoutEntry {
    const fn new(field: Field, address: u32, width: u32) -> Self {
        Self { field, address, width }
    }

    /// One past the last address of the entry.
    pub fn end(&self) -> u32 {
        self.address + self.width
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.address && address < self.end()
    }

    fn overlaps(&self, other: &LayoutEntry) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

/// The layout table, built once for a given device capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    entries: [LayoutEntry; 8],
}

impl Layout {
    const FIXED: [LayoutEntry; 7] = [
        LayoutEntry::new(Field::Magic, 0, 1),
        LayoutEntry::new(Field::Config, 1, 1),
        LayoutEntry::new(Field::MaxG, 2, 1),
        LayoutEntry::new(Field::BiasX, 3, 2),
        LayoutEntry::new(Field::BiasY, 5, 2),
        LayoutEntry::new(Field::BiasZ, 7, 2),
        LayoutEntry::new(Field::Reserved, 9, 1),
    ];

    /// Builds the table for a device of `capacity` bytes. The log region takes
    /// everything from [`LOG_START`] to the end of the device.
    pub fn new(capacity: u32) -> Self {
        let log = LayoutEntry::new(Field::Log, LOG_START, capacity.saturating_sub(LOG_START));
        let f = Self::FIXED;
        let layout = Self {
            entries: [f[0], f[1], f[2], f[3], f[4], f[5], f[6], log],
        };
        debug_assert!(layout.is_consistent(), "layout entries overlap");
        layout
    }

    pub fn entry(&self, field: Field) -> LayoutEntry {
        // entries are stored in declaration order of `Field`
        self.entries[field as usize]
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    pub fn log_region(&self) -> LayoutEntry {
        self.entry(Field::Log)
    }

    /// Total number of bytes covered by the table.
    pub fn capacity(&self) -> u32 {
        self.log_region().end()
    }

    /// Field owning `address`, if any.
    pub fn field_at(&self, address: u32) -> Option<Field> {
        self.entries.iter().find(|e| e.contains(address)).map(|e| e.field)
    }

    /// No two entries intersect and the log starts after every fixed field.
    pub fn is_consistent(&self) -> bool {
        let log = self.log_region();
        for (i, a) in self.entries.iter().enumerate() {
            if a.field != Field::Log && a.end() > log.address {
                return false;
            }
            for b in &self.entries[i + 1..] {
                if a.width > 0 && b.width > 0 && a.overlaps(b) {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Splits a 16-bit value into its stored byte pair, most significant byte first.
pub fn split_i16(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn join_i16(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}
