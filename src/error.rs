//! Library and application errors

use std::{io, process::ExitStatus};

use miette::Diagnostic;
use thiserror::Error;

/// All possible errors returned by srflash
#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Asset code '{code}' is {len} bytes, which does not fit the {width}-byte firmware slot")]
    #[diagnostic(
        code(srflash::asset_code_too_long),
        help("Asset codes are at most 13 characters on top of the 'sr' prefix")
    )]
    AssetCodeTooLong {
        code: String,
        len: usize,
        width: usize,
    },

    #[error("Operation was cancelled by the user")]
    #[diagnostic(code(srflash::cancelled))]
    Cancelled,

    #[error("'{tool}' exited with {status}")]
    #[diagnostic(code(srflash::eeprom_tool))]
    EepromToolFailed {
        tool: &'static str,
        status: ExitStatus,
    },

    #[error("EEPROM read-back does not match what was written")]
    #[diagnostic(
        code(srflash::eeprom_verification),
        help("The EEPROM may be worn out, or the board may have lost power while it was being programmed")
    )]
    EepromVerificationFailed,

    #[error("'{tool}' exited with {status}")]
    #[diagnostic(code(srflash::flash_failed))]
    FlashFailed {
        tool: &'static str,
        status: ExitStatus,
    },

    #[error(transparent)]
    IoError(#[from] io::Error),

    #[error("The port does not report a USB serial number to use as the asset code")]
    #[diagnostic(
        code(srflash::no_descriptor_serial),
        help("Program the EEPROM first, or enter the asset code manually")
    )]
    NoDescriptorSerial,

    #[error("No serial ports could be detected")]
    #[diagnostic(
        code(srflash::no_serial),
        help("Make sure the board is connected to the host system and powered")
    )]
    NoSerial,

    #[error("Couldn't find the asset code placeholder in the firmware image")]
    #[diagnostic(
        code(srflash::placeholder_not_found),
        help("The image must contain exactly one 15-byte run of 'X' characters; check that the firmware was built for commissioning")
    )]
    PlaceholderNotFound,

    #[error(transparent)]
    Prompt(#[from] dialoguer::Error),

    #[error("The serial port '{0}' could not be found")]
    #[diagnostic(
        code(srflash::serial_not_found),
        help("Make sure the correct device is connected to the host system")
    )]
    SerialNotFound(String),

    #[error("Failed to run '{tool}'")]
    #[diagnostic(
        code(srflash::tool_spawn),
        help("Make sure '{tool}' is installed and on your PATH")
    )]
    ToolSpawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },
}
