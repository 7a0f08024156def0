//! Command-line interface configuration
//!
//! srflash reads an optional `srflash.toml`, from the current directory
//! first and the user's configuration directory otherwise. It can pin the
//! serial port, recognize extra USB adapters as commissioning ports, and
//! override the flash baud rate and post-flash settle delay.

use std::{
    fs::{create_dir_all, read_to_string, write},
    path::PathBuf,
};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};
use serialport::UsbPortInfo;

/// A configured, known serial connection
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Connection {
    /// Name of the serial port used for communication
    pub serial: Option<String>,
}

/// A configured, known USB device
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UsbDevice {
    /// USB Vendor ID
    #[serde(
        serialize_with = "serialize_u16_to_hex",
        deserialize_with = "deserialize_hex_to_u16"
    )]
    pub vid: u16,
    /// USB Product ID
    #[serde(
        serialize_with = "serialize_u16_to_hex",
        deserialize_with = "deserialize_hex_to_u16"
    )]
    pub pid: u16,
}

impl UsbDevice {
    /// Check if the given USB port matches this device
    pub fn matches(&self, port: &UsbPortInfo) -> bool {
        self.vid == port.vid && self.pid == port.pid
    }
}

fn deserialize_hex_to_u16<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let hex = String::deserialize(deserializer)?.to_lowercase();
    let hex = hex.trim_start_matches("0x");

    u16::from_str_radix(hex, 16).map_err(serde::de::Error::custom)
}

fn serialize_u16_to_hex<S>(decimal: &u16, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format!("{decimal:04x}"))
}

/// Deserialized contents of a configuration file
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Preferred serial port
    #[serde(default)]
    pub connection: Connection,
    /// Extra USB devices recognized as commissioning ports
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
    /// Baud rate handed to the flashing tool
    #[serde(default)]
    pub flash_baud: Option<u32>,
    /// Seconds to wait after flashing before verification
    #[serde(default)]
    pub settle_delay: Option<u64>,
    /// Path of the file the configuration was loaded from
    #[serde(skip)]
    save_path: PathBuf,
}

impl Config {
    /// Load configuration from the configuration file, if one exists.
    pub fn load() -> Result<Self> {
        let file = Self::config_path()?;

        let mut config: Config = match read_to_string(&file) {
            Ok(data) => toml::from_str(&data)
                .into_diagnostic()
                .wrap_err_with(|| format!("Failed to parse {}", file.display()))?,
            Err(_) => Self::default(),
        };
        config.save_path = file;

        debug!("Config: {:#?}", config);
        Ok(config)
    }

    /// Save the configuration, modified by `modify_fn`, back to the file it
    /// was loaded from.
    pub fn save_with<F: Fn(&mut Self)>(&self, modify_fn: F) -> Result<()> {
        let mut copy = self.clone();
        modify_fn(&mut copy);

        let serialized = toml::to_string(&copy)
            .into_diagnostic()
            .wrap_err("Failed to serialize config")?;

        if let Some(parent) = self.save_path.parent() {
            create_dir_all(parent)
                .into_diagnostic()
                .wrap_err("Failed to create config directory")?;
        }

        write(&self.save_path, serialized)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write config to {}", self.save_path.display()))
    }

    fn config_path() -> Result<PathBuf> {
        let local_config = std::env::current_dir().into_diagnostic()?.join("srflash.toml");
        if local_config.exists() {
            return Ok(local_config);
        }

        let project_dirs = ProjectDirs::from("uk", "srobo", "srflash")
            .ok_or_else(|| miette::miette!("No configuration directory available"))?;
        Ok(project_dirs.config_dir().join("srflash.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize, Serialize)]
    struct TestData {
        #[serde(
            serialize_with = "serialize_u16_to_hex",
            deserialize_with = "deserialize_hex_to_u16"
        )]
        value: u16,
    }

    #[test]
    fn test_deserialize_hex_to_u16() {
        let result: Result<TestData, _> = toml::from_str(r#"value = "0403""#);
        assert_eq!(result.unwrap().value, 0x0403);

        let result: Result<TestData, _> = toml::from_str(r#"value = "0x6001""#);
        assert_eq!(result.unwrap().value, 0x6001);

        // Short values are zero-extended
        let result: Result<TestData, _> = toml::from_str(r#"value = "a""#);
        assert_eq!(result.unwrap().value, 0x0a);

        // Case-insensitive
        let result: Result<TestData, _> = toml::from_str(r#"value = "A1B2""#);
        assert_eq!(result.unwrap().value, 0xa1b2);

        // Invalid
        let result: Result<TestData, _> = toml::from_str(r#"value = "gg""#);
        assert!(result.is_err());
    }

    #[test]
    fn usb_devices_parse_from_config() {
        let config: Config = toml::from_str(
            r#"
            [[usb_device]]
            vid = "0403"
            pid = "6001"
            "#,
        )
        .unwrap();

        assert_eq!(config.usb_device.len(), 1);
        assert_eq!(config.usb_device[0].vid, 0x0403);
        assert_eq!(config.usb_device[0].pid, 0x6001);
    }

    #[test]
    fn settle_delay_and_baud_are_optional() {
        let config: Config = toml::from_str("settle_delay = 5\n").unwrap();
        assert_eq!(config.settle_delay, Some(5));
        assert_eq!(config.flash_baud, None);
    }
}
