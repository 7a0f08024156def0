//! CLI utilities for the srflash binary
//!
//! Hosts the shared argument types and the production implementation of the
//! commissioning loop's [`BoardServices`] seam: operator prompts via the
//! terminal, serial ports, and the external flashing and EEPROM tools.

use clap::Args;
use dialoguer::{theme::ColorfulTheme, Confirm, Input};
use serialport::SerialPortInfo;

use crate::{
    asset_code::{self, AssetCode},
    commission::BoardServices,
    eeprom::EepromProgrammer,
    error::Error,
    flasher::FirmwareFlasher,
    verifier::{DeviceVerifier, Verification},
};

pub mod config;
pub mod serial;

use config::Config;

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Serial port the board's bootloader is connected to; autodetected by
    /// the board's USB identity when omitted
    #[arg(short = 'p', long)]
    pub port: Option<String>,
}

/// The production bench: one operator, one board at a time.
pub struct Bench {
    firmware: Vec<u8>,
    version: String,
    port: SerialPortInfo,
    config: Config,
    flasher: FirmwareFlasher,
    eeprom: Option<EepromProgrammer>,
    detect_asset: bool,
}

impl Bench {
    pub fn new(
        firmware: Vec<u8>,
        version: String,
        port: SerialPortInfo,
        config: Config,
        flasher: FirmwareFlasher,
    ) -> Self {
        Bench {
            firmware,
            version,
            port,
            config,
            flasher,
            eeprom: None,
            detect_asset: false,
        }
    }

    pub fn with_eeprom(mut self, eeprom: Option<EepromProgrammer>) -> Self {
        self.eeprom = eeprom;
        self
    }

    /// Read the asset code from the already-programmed EEPROM descriptor
    /// instead of prompting for it.
    pub fn with_detect_asset(mut self, detect_asset: bool) -> Self {
        self.detect_asset = detect_asset;
        self
    }

    fn prompt_asset_code(&self) -> Result<AssetCode, Error> {
        let input: String = Input::with_theme(&ColorfulTheme::default())
            .with_prompt("Enter the asset code to bake into the firmware and USB descriptor")
            .interact_text()
            .map_err(|_| Error::Cancelled)?;

        Ok(AssetCode::from_operator_input(&input))
    }
}

impl BoardServices for Bench {
    fn confirm_cycle(&mut self) -> Result<bool, Error> {
        println!(
            "To flash the board using the factory bootloader you need to connect \
             12 volts to the board and connect the USB port. \
             Once connected press the board's pushbutton."
        );

        // Interrupting or closing stdin at this prompt ends the run cleanly.
        match Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Flash the next motor board?")
            .default(true)
            .interact_opt()
        {
            Ok(Some(answer)) => Ok(answer),
            Ok(None) | Err(_) => Ok(false),
        }
    }

    fn collect_asset_code(&mut self) -> Result<AssetCode, Error> {
        if self.detect_asset {
            serial::detect_asset_code(&self.port)
        } else {
            self.prompt_asset_code()
        }
    }

    fn flash(&mut self, code: &AssetCode) -> Result<(), Error> {
        let patched = asset_code::patch_image(&self.firmware, code)?;
        self.flasher.flash(&patched, &self.port.port_name)
    }

    fn verify(&mut self, expected: &AssetCode) -> Verification {
        // The board re-enumerates after flashing; prefer whatever port now
        // carries the board's USB identity, falling back to the flashing
        // port.
        let port_name = serial::find_board_port(&self.config)
            .unwrap_or_else(|| self.port.port_name.clone());

        DeviceVerifier::new(&self.version)
            .with_expected_serial(expected.clone())
            .verify(&port_name)
    }

    fn program_eeprom(&mut self, code: &AssetCode) -> Result<(), Error> {
        match &self.eeprom {
            Some(programmer) => programmer.program(code),
            None => Ok(()),
        }
    }
}
