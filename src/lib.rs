//! Commissioning library for Student Robotics motor boards.
//!
//! One commissioning cycle patches a per-unit asset code into a firmware
//! image, flashes it to the board with `stm32flash`, confirms the flash via
//! the board's `*IDN?` identification handshake, and optionally programs the
//! FTDI EEPROM with `ftdi_eeprom`, verifying the write by reading it back.

pub mod asset_code;
pub mod cli;
pub mod commission;
pub mod eeprom;
pub mod error;
pub mod flasher;
pub mod logbook;
pub mod logging;
pub mod verifier;

pub use crate::error::Error;
