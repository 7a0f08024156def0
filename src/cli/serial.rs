//! Serial port discovery and selection.

use crossterm::style::Stylize;
use dialoguer::{theme::ColorfulTheme, Confirm, Select};
use log::debug;
use serialport::{available_ports, SerialPortInfo, SerialPortType, UsbPortInfo};

use super::{
    config::{Config, UsbDevice},
    ConnectArgs,
};
use crate::{
    asset_code::AssetCode,
    error::Error,
    verifier::{BOARD_PID, BOARD_VID},
};

/// The motor board's FTDI interface.
const KNOWN_DEVICES: &[UsbDevice] = &[UsbDevice {
    vid: BOARD_VID,
    pid: BOARD_PID,
}];

/// Resolves the serial port to commission on. An explicitly named port (on
/// the command line, or pinned in the configuration file) takes precedence;
/// otherwise the connected USB serial ports are detected and, when the
/// choice is ambiguous, the operator picks one.
pub fn get_serial_port_info(
    matches: &ConnectArgs,
    config: &Config,
) -> Result<SerialPortInfo, Error> {
    let ports = detect_usb_serial_ports().unwrap_or_default();

    if let Some(serial) = &matches.port {
        #[cfg(not(target_os = "windows"))]
        let serial = std::fs::canonicalize(serial)?.to_string_lossy().to_string();
        find_serial_port(&ports, &serial)
    } else if let Some(serial) = &config.connection.serial {
        #[cfg(not(target_os = "windows"))]
        let serial = std::fs::canonicalize(serial)?.to_string_lossy().to_string();
        find_serial_port(&ports, &serial)
    } else {
        let (port, matches) = select_serial_port(ports, config)?;

        match &port.port_type {
            SerialPortType::UsbPort(usb_info) if !matches => {
                let remember = Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt("Remember this serial port for future use?")
                    .interact_opt()?
                    .unwrap_or_default();

                if remember {
                    // Allow this operation to fail without terminating the
                    // application, but inform the user if something goes
                    // wrong.
                    if let Err(e) = config.save_with(|config| {
                        config.usb_device.push(UsbDevice {
                            vid: usb_info.vid,
                            pid: usb_info.pid,
                        })
                    }) {
                        eprintln!("Failed to save config {:#}", e);
                    }
                }
            }
            _ => {}
        }

        Ok(port)
    }
}

/// First detected port whose USB identity matches the board. Used by the
/// post-flash verifier, which must never prompt.
pub fn find_board_port(config: &Config) -> Option<String> {
    let ports = detect_usb_serial_ports().unwrap_or_default();

    ports
        .into_iter()
        .find(|port| match &port.port_type {
            SerialPortType::UsbPort(info) => device_matches(info, config),
            _ => false,
        })
        .map(|port| port.port_name)
}

/// Reads the asset code already programmed into the EEPROM descriptor: the
/// FTDI reports it as its USB serial-number string.
pub fn detect_asset_code(port: &SerialPortInfo) -> Result<AssetCode, Error> {
    debug!("Reading descriptor serial from {}", port.port_name);

    match &port.port_type {
        SerialPortType::UsbPort(info) => info
            .serial_number
            .as_deref()
            .map(AssetCode::from_descriptor)
            .ok_or(Error::NoDescriptorSerial),
        _ => Err(Error::NoDescriptorSerial),
    }
}

/// Given a vector of `SerialPortInfo` structs, attempt to find and return
/// one whose `port_name` field matches the provided `name` argument.
fn find_serial_port(ports: &[SerialPortInfo], name: &str) -> Result<SerialPortInfo, Error> {
    let port_info = ports
        .iter()
        .find(|port| port.port_name.to_lowercase() == name.to_lowercase());

    if let Some(port) = port_info {
        Ok(port.to_owned())
    } else {
        Err(Error::SerialNotFound(name.to_owned()))
    }
}

fn detect_usb_serial_ports() -> serialport::Result<Vec<SerialPortInfo>> {
    let ports = available_ports()?;
    let ports = ports
        .into_iter()
        .filter(|port_info| {
            matches!(
                &port_info.port_type,
                SerialPortType::UsbPort(..) | SerialPortType::Unknown
            )
        })
        .collect::<Vec<_>>();

    Ok(ports)
}

fn device_matches(info: &UsbPortInfo, config: &Config) -> bool {
    config
        .usb_device
        .iter()
        .chain(KNOWN_DEVICES.iter())
        .any(|dev| dev.matches(info))
}

fn select_serial_port(
    ports: Vec<SerialPortInfo>,
    config: &Config,
) -> Result<(SerialPortInfo, bool), Error> {
    if ports.len() > 1 {
        // Multiple serial ports detected; ports which match the board's USB
        // identity are highlighted.
        println!(
            "Detected {} serial ports. Ports which match a known board are highlighted.\n",
            ports.len()
        );

        let port_names = ports
            .iter()
            .map(|port_info| match &port_info.port_type {
                SerialPortType::UsbPort(info) => {
                    let formatted = if device_matches(info, config) {
                        port_info.port_name.as_str().bold()
                    } else {
                        port_info.port_name.as_str().reset()
                    };

                    if let Some(product) = &info.product {
                        format!("{} - {}", formatted, product)
                    } else {
                        formatted.to_string()
                    }
                }
                _ => port_info.port_name.clone(),
            })
            .collect::<Vec<_>>();

        let index = Select::with_theme(&ColorfulTheme::default())
            .items(&port_names)
            .default(0)
            .interact_opt()?
            .ok_or(Error::Cancelled)?;

        match ports.get(index) {
            Some(port_info) => {
                let matches = if let SerialPortType::UsbPort(usb_info) = &port_info.port_type {
                    device_matches(usb_info, config)
                } else {
                    false
                };

                Ok((port_info.to_owned(), matches))
            }
            None => Err(Error::SerialNotFound(
                port_names.get(index).unwrap().to_string(),
            )),
        }
    } else if let [port] = ports.as_slice() {
        // Single serial port detected
        let port_name = port.port_name.clone();
        let port_info = match &port.port_type {
            SerialPortType::UsbPort(info) => info,
            SerialPortType::Unknown => &UsbPortInfo {
                vid: 0,
                pid: 0,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
            _ => unreachable!(),
        };

        if device_matches(port_info, config) {
            Ok((port.to_owned(), true))
        } else if confirm_port(&port_name, port_info)? {
            Ok((port.to_owned(), false))
        } else {
            Err(Error::SerialNotFound(port_name))
        }
    } else {
        // No serial ports detected
        Err(Error::NoSerial)
    }
}

fn confirm_port(port_name: &str, port_info: &UsbPortInfo) -> Result<bool, Error> {
    Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt({
            if let Some(product) = &port_info.product {
                format!("Use serial port '{}' - {}?", port_name, product)
            } else {
                format!("Use serial port '{}'?", port_name)
            }
        })
        .interact_opt()?
        .ok_or(Error::Cancelled)
}
