//! Post-flash device identification.
//!
//! A freshly flashed board is asked to identify itself over serial; the
//! reported identity is compared against what was just commissioned. A board
//! that answers with the wrong identity is an ordinary negative outcome, not
//! an error: only failing to reach the transport at all is distinguished.

use std::{
    fmt,
    io::{self, Read, Write},
    time::Duration,
};

use log::{info, warn};
use serialport::FlowControl;

use crate::asset_code::AssetCode;

/// Manufacturer string a healthy board reports.
pub const EXPECTED_MANUFACTURER: &str = "Student Robotics";

/// Board model this tool commissions.
pub const BOARD_TYPE: &str = "MCv4B";

/// USB vendor ID of the board's FTDI interface.
pub const BOARD_VID: u16 = 0x0403;

/// USB product ID of the board's FTDI interface.
pub const BOARD_PID: u16 = 0x6001;

const IDENTIFY_COMMAND: &[u8] = b"*IDN?\n";
const IDENTIFY_BAUD: u32 = 115_200;
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Outcome of one identification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Every field matched; carries the serial the board reported.
    Verified { serial: String },
    /// The board answered, but the identity did not match.
    Mismatch(Mismatch),
    /// The serial port could not be opened or read.
    Transport { message: String },
}

impl Verification {
    /// The verified serial, if the board passed.
    pub fn serial(&self) -> Option<&str> {
        match self {
            Verification::Verified { serial } => Some(serial),
            _ => None,
        }
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Verified { serial } => write!(f, "verified as {serial}"),
            Verification::Mismatch(mismatch) => mismatch.fmt(f),
            Verification::Transport { message } => {
                write!(f, "failed to reach the board: {message}")
            }
        }
    }
}

/// The ways an answering board can fail verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mismatch {
    /// The response did not end in a newline: a corrupted or partial read.
    IncompleteResponse { raw: Vec<u8> },
    /// Fewer than four `:`-separated fields came back.
    MalformedIdentity { line: String },
    Manufacturer { found: String },
    BoardType { found: String },
    Version { found: String },
    Serial { found: String },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::IncompleteResponse { raw } => {
                write!(f, "board did not correctly respond to identify, returned {raw:?}")
            }
            Mismatch::MalformedIdentity { line } => {
                write!(f, "board returned a malformed identity line: {line:?}")
            }
            Mismatch::Manufacturer { found } => {
                write!(f, "incorrect manufacturer returned: {found:?}")
            }
            Mismatch::BoardType { found } => write!(f, "incorrect board type returned: {found:?}"),
            Mismatch::Version { found } => write!(f, "incorrect version returned: {found:?}"),
            Mismatch::Serial { found } => {
                write!(f, "serial number differs from expected, received {found:?}")
            }
        }
    }
}

/// The identity a board reports in response to `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub board_type: String,
    pub serial: String,
    pub version: String,
}

impl DeviceIdentity {
    /// Parses one `manufacturer:board_type:serial:version` line. Extra
    /// fields are ignored; fewer than four is `None`.
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.trim_end().split(':').collect();
        if fields.len() < 4 {
            return None;
        }

        Some(DeviceIdentity {
            manufacturer: fields[0].to_owned(),
            board_type: fields[1].to_owned(),
            serial: fields[2].to_owned(),
            version: fields[3].to_owned(),
        })
    }
}

/// Performs the `*IDN?` handshake and checks the reported identity.
#[derive(Debug, Clone)]
pub struct DeviceVerifier {
    expected_version: String,
    expected_serial: Option<AssetCode>,
    timeout: Duration,
}

impl DeviceVerifier {
    pub fn new(expected_version: &str) -> Self {
        DeviceVerifier {
            expected_version: expected_version.to_owned(),
            expected_serial: None,
            timeout: IDENTIFY_TIMEOUT,
        }
    }

    /// Additionally require the board to report this exact serial.
    pub fn with_expected_serial(mut self, code: AssetCode) -> Self {
        self.expected_serial = Some(code);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Runs the full handshake against the named port. Never fails for an
    /// ordinary mismatch; an unreachable port yields the transport outcome.
    pub fn verify(&self, port_name: &str) -> Verification {
        let port = serialport::new(port_name, IDENTIFY_BAUD)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open();

        let mut port = match port {
            Ok(port) => port,
            Err(err) => {
                warn!("Failed to open serial port {port_name}: {err}");
                return Verification::Transport {
                    message: err.to_string(),
                };
            }
        };

        match self.identify(&mut *port) {
            Ok(verification) => verification,
            Err(err) => {
                warn!("Serial transport failed during identification: {err}");
                Verification::Transport {
                    message: err.to_string(),
                }
            }
        }
    }

    /// Transport-independent handshake: flush, send `*IDN?`, read one line,
    /// check it. Exposed separately so it can run against any byte stream.
    pub fn identify<T: Read + Write + ?Sized>(&self, transport: &mut T) -> io::Result<Verification> {
        transport.flush()?;
        transport.write_all(IDENTIFY_COMMAND)?;

        let raw = read_line(transport)?;
        Ok(self.check(&raw))
    }

    /// Pure compare step against the raw response bytes.
    pub fn check(&self, raw: &[u8]) -> Verification {
        // Without the terminator the read was cut short; nothing in the
        // line can be trusted.
        if !raw.ends_with(b"\n") {
            warn!("Board did not correctly respond to identify, returned: {raw:?}");
            return Verification::Mismatch(Mismatch::IncompleteResponse { raw: raw.to_vec() });
        }

        let line = String::from_utf8_lossy(raw);
        let identity = match DeviceIdentity::parse(&line) {
            Some(identity) => identity,
            None => {
                warn!("Board returned a malformed identity line: {line:?}");
                return Verification::Mismatch(Mismatch::MalformedIdentity {
                    line: line.into_owned(),
                });
            }
        };

        if identity.manufacturer != EXPECTED_MANUFACTURER {
            return Verification::Mismatch(Mismatch::Manufacturer {
                found: identity.manufacturer,
            });
        }
        if identity.board_type != BOARD_TYPE {
            return Verification::Mismatch(Mismatch::BoardType {
                found: identity.board_type,
            });
        }
        if identity.version != self.expected_version {
            return Verification::Mismatch(Mismatch::Version {
                found: identity.version,
            });
        }
        if let Some(expected) = &self.expected_serial {
            if identity.serial != expected.as_str() {
                return Verification::Mismatch(Mismatch::Serial {
                    found: identity.serial,
                });
            }
        }

        info!("Successfully flashed {}", identity.serial);
        Verification::Verified {
            serial: identity.serial,
        }
    }
}

/// Reads up to one newline-terminated line. A read timeout or end of stream
/// ends the line early; the caller detects that by the missing terminator.
fn read_line<T: Read + ?Sized>(transport: &mut T) -> io::Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match transport.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => break,
            Err(err) => return Err(err),
        }
    }

    Ok(line)
}
