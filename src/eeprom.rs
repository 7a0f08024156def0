//! FTDI EEPROM programming with read-back verification.
//!
//! `ftdi_eeprom` works relative to its config file: flashing produces a
//! `.eeprom` artifact next to it, and read-back mode overwrites the same
//! artifact. Both invocations are pinned to a scratch directory via
//! `Command::current_dir`; the process working directory is never touched.

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::info;
use tempfile::TempDir;

use crate::{asset_code::AssetCode, error::Error};

pub const EEPROM_TOOL: &str = "ftdi_eeprom";

/// Token in the config template replaced by the asset code.
pub const SERIAL_TOKEN: &str = "SERIAL";

pub struct EepromProgrammer {
    template: PathBuf,
}

impl EepromProgrammer {
    pub fn new(template: impl Into<PathBuf>) -> Self {
        EepromProgrammer {
            template: template.into(),
        }
    }

    /// Programs the EEPROM with `code` and verifies the write by reading the
    /// contents back. Verification failure is a hard failure for the cycle;
    /// it is not retried here.
    pub fn program(&self, code: &AssetCode) -> Result<(), Error> {
        let template_data = fs::read_to_string(&self.template)?;
        let config_data = instantiate(&template_data, code);

        let scratch = TempDir::new()?;
        let config_name = config_file_name(&self.template);
        fs::write(scratch.path().join(&config_name), config_data)?;

        self.run_tool(scratch.path(), "--flash-eeprom", &config_name)?;

        // Set the freshly written image aside so read-back can't clobber it.
        let artifact = scratch.path().join(artifact_name(&config_name));
        let written_copy = scratch.path().join(written_copy_name(&config_name));
        fs::rename(&artifact, &written_copy)?;

        self.run_tool(scratch.path(), "--read-eeprom", &config_name)?;

        let written = fs::read(&written_copy)?;
        let read_back = fs::read(&artifact)?;
        verify(&written, &read_back)?;

        info!("EEPROM verified");
        Ok(())
    }

    fn run_tool(&self, dir: &Path, mode: &str, config: &str) -> Result<(), Error> {
        let status = Command::new(EEPROM_TOOL)
            .arg(mode)
            .arg(config)
            .current_dir(dir)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| Error::ToolSpawn {
                tool: EEPROM_TOOL,
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::EepromToolFailed {
                tool: EEPROM_TOOL,
                status,
            })
        }
    }
}

/// Instantiates the config template for one board.
pub fn instantiate(template: &str, code: &AssetCode) -> String {
    template.replace(SERIAL_TOKEN, code.as_str())
}

/// Byte-exact comparison of the written and read-back EEPROM contents.
pub fn verify(written: &[u8], read_back: &[u8]) -> Result<(), Error> {
    if written == read_back {
        Ok(())
    } else {
        Err(Error::EepromVerificationFailed)
    }
}

/// `mcv4.conf.in` -> `mcv4.conf`
fn config_file_name(template: &Path) -> String {
    let name = template
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| String::from("eeprom.conf.in"));

    name.strip_suffix(".in").map(str::to_owned).unwrap_or(name)
}

/// `mcv4.conf` -> `mcv4.eeprom`
fn artifact_name(config: &str) -> String {
    let stem = config.strip_suffix(".conf").unwrap_or(config);
    format!("{stem}.eeprom")
}

/// `mcv4.conf` -> `mcv4-in.eeprom`
fn written_copy_name(config: &str) -> String {
    let stem = config.strip_suffix(".conf").unwrap_or(config);
    format!("{stem}-in.eeprom")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_buffers_verify() {
        assert!(verify(b"\x01\x02\x03", b"\x01\x02\x03").is_ok());
    }

    #[test]
    fn a_single_differing_byte_fails_verification() {
        let written = vec![0u8; 128];
        let mut read_back = written.clone();
        read_back[77] ^= 0x01;

        assert!(matches!(
            verify(&written, &read_back),
            Err(Error::EepromVerificationFailed)
        ));
    }

    #[test]
    fn template_substitution_replaces_the_serial_token() {
        let template = "vendor_id=0x0403\nserial=\"SERIAL\"\n";
        let config = instantiate(template, &AssetCode::from_descriptor("srAB12"));
        assert_eq!(config, "vendor_id=0x0403\nserial=\"srAB12\"\n");
    }

    #[test]
    fn artifact_names_derive_from_the_template_stem() {
        let config = config_file_name(Path::new("../utils/mcv4.conf.in"));
        assert_eq!(config, "mcv4.conf");
        assert_eq!(artifact_name(&config), "mcv4.eeprom");
        assert_eq!(written_copy_name(&config), "mcv4-in.eeprom");
    }
}
