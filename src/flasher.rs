//! Thin wrapper around the external `stm32flash` tool.
//!
//! The tool is a black box: the patched image goes in via a scratch file,
//! and only the exit status comes back out.

use std::{
    fs,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use log::info;
use tempfile::TempDir;

use crate::error::Error;

pub const FLASH_TOOL: &str = "stm32flash";

/// Baud rate the factory bootloader listens at.
pub const FLASH_BAUD: u32 = 115_200;

/// Time to allow the board to reboot into the new firmware before the
/// identification handshake. Empirical; configurable via the CLI.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

pub struct FirmwareFlasher {
    baud: u32,
    settle_delay: Duration,
}

impl FirmwareFlasher {
    pub fn new() -> Self {
        FirmwareFlasher {
            baud: FLASH_BAUD,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Flashes `image` to the board on `port`, then waits out the settle
    /// delay so the new firmware is up before verification. The scratch
    /// directory holding the image is removed on every exit path.
    pub fn flash(&self, image: &[u8], port: &str) -> Result<(), Error> {
        let scratch = TempDir::new()?;
        let image_path = scratch.path().join("main.bin");
        fs::write(&image_path, image)?;

        info!("Flashing {} bytes via {port}", image.len());
        let status = Command::new(FLASH_TOOL)
            .arg("-b")
            .arg(self.baud.to_string())
            .arg("-w")
            .arg(&image_path)
            .arg("-v")
            .arg("-R")
            .arg(port)
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| Error::ToolSpawn {
                tool: FLASH_TOOL,
                source,
            })?;

        if !status.success() {
            return Err(Error::FlashFailed {
                tool: FLASH_TOOL,
                status,
            });
        }

        thread::sleep(self.settle_delay);

        Ok(())
    }
}

impl Default for FirmwareFlasher {
    fn default() -> Self {
        Self::new()
    }
}
