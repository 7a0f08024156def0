use std::{fs, path::PathBuf, time::Duration};

use clap::Parser;
use log::{debug, LevelFilter};
use miette::{IntoDiagnostic, Result, WrapErr};
use srflash::{
    cli::{self, config::Config, Bench, ConnectArgs},
    commission::CommissioningController,
    eeprom::EepromProgrammer,
    flasher::FirmwareFlasher,
    logbook::Logbook,
    logging::initialize_logger,
};

/// Commission Student Robotics motor boards: bake a per-unit asset code into
/// the firmware, flash it, verify the board's reported identity, and
/// optionally program the FTDI EEPROM to match.
#[derive(Debug, Parser)]
#[command(about, version)]
struct Cli {
    /// Firmware image to flash
    file: PathBuf,

    /// Version number the new firmware reports
    version: String,

    /// File to append successfully verified serials to
    #[arg(short = 'l', long)]
    serial_log: Option<PathBuf>,

    #[command(flatten)]
    connect_args: ConnectArgs,

    /// Also program the FTDI EEPROM with the asset code
    #[arg(long, requires = "eeprom_config")]
    eeprom: bool,

    /// EEPROM configuration template; its SERIAL token is replaced per board
    #[arg(long)]
    eeprom_config: Option<PathBuf>,

    /// Autodetect the asset code from the already-programmed EEPROM
    #[arg(short = 'a', long, conflicts_with = "eeprom")]
    detect_asset: bool,

    /// Seconds to wait after flashing before verifying
    #[arg(long)]
    settle_delay: Option<u64>,
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    let args = Cli::parse();
    debug!("{:#?}", args);

    let config = Config::load()?;

    let firmware = fs::read(&args.file)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to read firmware image {}", args.file.display()))?;

    let port = cli::serial::get_serial_port_info(&args.connect_args, &config)?;
    println!("Serial port: {}", port.port_name);

    let mut flasher = FirmwareFlasher::new();
    if let Some(baud) = config.flash_baud {
        flasher = flasher.with_baud(baud);
    }
    if let Some(secs) = args.settle_delay.or(config.settle_delay) {
        flasher = flasher.with_settle_delay(Duration::from_secs(secs));
    }

    let eeprom = match (args.eeprom, &args.eeprom_config) {
        (true, Some(template)) => Some(EepromProgrammer::new(template)),
        _ => None,
    };

    let bench = Bench::new(firmware, args.version, port, config, flasher)
        .with_eeprom(eeprom)
        .with_detect_asset(args.detect_asset);

    let mut controller = CommissioningController::new(bench)
        .with_eeprom(args.eeprom)
        .with_logbook(args.serial_log.map(Logbook::new));

    controller.run()?;

    Ok(())
}
