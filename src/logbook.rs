//! Append-only log of successfully commissioned serials.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use crate::error::Error;

pub struct Logbook {
    path: PathBuf,
}

impl Logbook {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Logbook { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one verified serial. The file is reopened for every write, so
    /// a crash can lose at most the entry being written.
    pub fn append(&self, serial: &str) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        writeln!(file, "{serial}")?;

        Ok(())
    }
}
