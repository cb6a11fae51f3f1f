use embassy_nrf::peripherals::TWISPI0;
use embassy_nrf::twim::{self, Twim};

use crate::at24c::{At24c, At24cError, DEFAULT_ADDRESS};
use crate::layout::DEFAULT_CAPACITY;

pub type MyTwim = Twim<'static, TWISPI0>;
pub type MyTwimError = twim::Error;

pub type EepromType = At24c<MyTwim>;
pub type EepromError = At24cError<MyTwimError>;

/// The 24C08 on the payload board, all address pins low.
pub fn eeprom(twim: MyTwim) -> EepromType {
    At24c::new(twim, DEFAULT_ADDRESS, DEFAULT_CAPACITY)
}
