//! Persistent configuration and telemetry store for a small EEPROM.
//!
//! The store checks a magic byte on startup, exposes blocking and
//! non-blocking writes over a fixed layout and keeps an append cursor
//! into the telemetry log region behind the fixed fields.

#![cfg_attr(target_os = "none", no_std)]
#![allow(async_fn_in_trait)]

pub mod at24c;
pub mod calibration;
pub mod command;
pub mod config;
pub mod gate;
pub mod layout;
pub mod log_region;
pub mod platform;
pub mod recorder;
pub mod scheduler;
pub mod store;

pub use config::StoreConfig;
pub use gate::{GateOutcome, GateState};
pub use layout::{Field, Layout, LayoutEntry};
pub use log_region::AppendOutcome;
pub use scheduler::WriteOutcome;
pub use store::{Store, StoreError};
