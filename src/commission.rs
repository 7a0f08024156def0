//! The commissioning control loop.
//!
//! One cycle per operator confirmation: collect an asset code, flash the
//! patched firmware, verify the board's identity, optionally program the
//! EEPROM, and log the verified serial. Recoverable failures discard the
//! whole cycle and return to the confirmation prompt; a discarded cycle's
//! asset code is never reused, since its flash outcome is unknown.

use log::{error, info, warn};

use crate::{
    asset_code::AssetCode,
    error::Error,
    logbook::Logbook,
    verifier::Verification,
};

/// Everything one cycle needs from the outside world. The production
/// implementation (prompts, serial ports, subprocesses) lives in the CLI;
/// tests substitute a scripted fake.
pub trait BoardServices {
    /// Blocks until the operator confirms the next cycle. `Ok(false)` means
    /// the operator is done.
    fn confirm_cycle(&mut self) -> Result<bool, Error>;

    /// Collects the asset code for this cycle, by prompt or autodetection.
    fn collect_asset_code(&mut self) -> Result<AssetCode, Error>;

    /// Patches `code` into the firmware and flashes it to the board.
    fn flash(&mut self, code: &AssetCode) -> Result<(), Error>;

    /// Runs the identification handshake against the flashed board.
    fn verify(&mut self, expected: &AssetCode) -> Verification;

    /// Programs and read-back-verifies the EEPROM.
    fn program_eeprom(&mut self, code: &AssetCode) -> Result<(), Error>;
}

/// Per-cycle state. Failure edges route back to the confirmation prompt by
/// discarding the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CycleState {
    Flashing,
    Verifying { code: AssetCode },
    ProgrammingEeprom { code: AssetCode, verification: Verification },
    Logging { verification: Verification },
}

/// How one cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Flashed and verified; the serial was appended to the log if one is
    /// configured.
    Verified { serial: String },
    /// The board answered but did not verify. Nothing was logged.
    Unverified(Verification),
    /// A recoverable failure discarded the cycle; the operator should retry.
    Discarded { reason: String },
}

pub struct CommissioningController<S> {
    services: S,
    program_eeprom: bool,
    logbook: Option<Logbook>,
}

impl<S: BoardServices> CommissioningController<S> {
    pub fn new(services: S) -> Self {
        CommissioningController {
            services,
            program_eeprom: false,
            logbook: None,
        }
    }

    /// Also program the FTDI EEPROM each cycle.
    pub fn with_eeprom(mut self, enabled: bool) -> Self {
        self.program_eeprom = enabled;
        self
    }

    /// Append verified serials here.
    pub fn with_logbook(mut self, logbook: Option<Logbook>) -> Self {
        self.logbook = logbook;
        self
    }

    /// Runs commissioning cycles until the operator stops. Per-cycle
    /// failures are reported and loop back to the confirmation prompt;
    /// operator abort returns cleanly. Anything else propagates.
    pub fn run(&mut self) -> Result<(), Error> {
        loop {
            match self.services.confirm_cycle() {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(Error::Cancelled) => return Ok(()),
                Err(err) => return Err(err),
            }

            match self.run_cycle() {
                Ok(CycleOutcome::Verified { serial }) => info!("Commissioned {serial}"),
                Ok(CycleOutcome::Unverified(verification)) => {
                    warn!("Board failed verification: {verification}")
                }
                Ok(CycleOutcome::Discarded { reason }) => error!("{reason}, try again"),
                Err(Error::Cancelled) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Drives one cycle through the state machine.
    fn run_cycle(&mut self) -> Result<CycleOutcome, Error> {
        let mut state = CycleState::Flashing;

        loop {
            state = match state {
                CycleState::Flashing => {
                    let code = self.services.collect_asset_code()?;
                    info!("Programming asset code: {code}");

                    match self.services.flash(&code) {
                        Ok(()) => CycleState::Verifying { code },
                        // The board's state is now unknown, so the code is
                        // dropped with the cycle: the operator re-supplies
                        // it on the next attempt.
                        Err(
                            err @ (Error::FlashFailed { .. }
                            | Error::PlaceholderNotFound
                            | Error::AssetCodeTooLong { .. }),
                        ) => {
                            return Ok(CycleOutcome::Discarded {
                                reason: format!("Failed to flash firmware: {err}"),
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
                CycleState::Verifying { code } => {
                    let verification = self.services.verify(&code);

                    if self.program_eeprom {
                        CycleState::ProgrammingEeprom { code, verification }
                    } else {
                        CycleState::Logging { verification }
                    }
                }
                CycleState::ProgrammingEeprom { code, verification } => {
                    match self.services.program_eeprom(&code) {
                        Ok(()) => CycleState::Logging { verification },
                        // A board that flashed and verified but failed
                        // EEPROM programming is not logged.
                        Err(
                            err @ (Error::EepromToolFailed { .. }
                            | Error::EepromVerificationFailed),
                        ) => {
                            return Ok(CycleOutcome::Discarded {
                                reason: format!("EEPROM write failed: {err}"),
                            });
                        }
                        Err(err) => return Err(err),
                    }
                }
                CycleState::Logging { verification } => {
                    return match verification {
                        Verification::Verified { serial } => {
                            if let Some(logbook) = &self.logbook {
                                logbook.append(&serial)?;
                            }
                            Ok(CycleOutcome::Verified { serial })
                        }
                        negative => Ok(CycleOutcome::Unverified(negative)),
                    };
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::process::ExitStatusExt, process::ExitStatus};

    use super::*;
    use crate::verifier::Mismatch;

    /// Scripted stand-in for the operator, board and external tools.
    struct FakeBench {
        confirmations: Vec<bool>,
        flash_failures: usize,
        eeprom_fails: bool,
        verification: Verification,
        flash_calls: usize,
        eeprom_calls: usize,
        codes_collected: usize,
    }

    impl FakeBench {
        fn new(verification: Verification) -> Self {
            FakeBench {
                confirmations: Vec::new(),
                flash_failures: 0,
                eeprom_fails: false,
                verification,
                flash_calls: 0,
                eeprom_calls: 0,
                codes_collected: 0,
            }
        }

        /// Confirmation answers, consumed front to back.
        fn confirmations(mut self, answers: &[bool]) -> Self {
            self.confirmations = answers.to_vec();
            self
        }

        fn failing_flashes(mut self, count: usize) -> Self {
            self.flash_failures = count;
            self
        }

        fn failing_eeprom(mut self) -> Self {
            self.eeprom_fails = true;
            self
        }
    }

    impl BoardServices for FakeBench {
        fn confirm_cycle(&mut self) -> Result<bool, Error> {
            if self.confirmations.is_empty() {
                return Ok(false);
            }
            Ok(self.confirmations.remove(0))
        }

        fn collect_asset_code(&mut self) -> Result<AssetCode, Error> {
            self.codes_collected += 1;
            Ok(AssetCode::from_operator_input(&format!(
                "code{}",
                self.codes_collected
            )))
        }

        fn flash(&mut self, _code: &AssetCode) -> Result<(), Error> {
            self.flash_calls += 1;
            if self.flash_calls <= self.flash_failures {
                return Err(Error::FlashFailed {
                    tool: "stm32flash",
                    status: ExitStatus::from_raw(1 << 8),
                });
            }
            Ok(())
        }

        fn verify(&mut self, _expected: &AssetCode) -> Verification {
            self.verification.clone()
        }

        fn program_eeprom(&mut self, _code: &AssetCode) -> Result<(), Error> {
            self.eeprom_calls += 1;
            if self.eeprom_fails {
                return Err(Error::EepromVerificationFailed);
            }
            Ok(())
        }
    }

    fn verified(serial: &str) -> Verification {
        Verification::Verified {
            serial: serial.to_owned(),
        }
    }

    #[test]
    fn verified_cycle_logs_exactly_one_serial() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("serials.log");

        let bench = FakeBench::new(verified("sr1234")).confirmations(&[true]);
        let mut controller = CommissioningController::new(bench)
            .with_logbook(Some(Logbook::new(&log_path)));

        controller.run().unwrap();

        assert_eq!(fs::read_to_string(&log_path).unwrap(), "sr1234\n");
    }

    #[test]
    fn flash_failure_discards_the_cycle_without_logging() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("serials.log");

        let bench = FakeBench::new(verified("sr1234"))
            .confirmations(&[true])
            .failing_flashes(1);
        let mut controller = CommissioningController::new(bench)
            .with_logbook(Some(Logbook::new(&log_path)));

        controller.run().unwrap();

        assert!(!log_path.exists());
    }

    #[test]
    fn flash_failure_discards_the_asset_code() {
        let bench = FakeBench::new(verified("sr1234"))
            .confirmations(&[true, true])
            .failing_flashes(1);
        let mut controller = CommissioningController::new(bench);

        controller.run().unwrap();

        // The failed attempt's code is not reused; a fresh one is collected
        // for the retry.
        assert_eq!(controller.services.codes_collected, 2);
        assert_eq!(controller.services.flash_calls, 2);
    }

    #[test]
    fn eeprom_failure_discards_a_verified_board() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("serials.log");

        let bench = FakeBench::new(verified("sr1234"))
            .confirmations(&[true])
            .failing_eeprom();
        let mut controller = CommissioningController::new(bench)
            .with_eeprom(true)
            .with_logbook(Some(Logbook::new(&log_path)));

        controller.run().unwrap();

        assert_eq!(controller.services.eeprom_calls, 1);
        assert!(!log_path.exists());
    }

    #[test]
    fn unverified_boards_are_not_logged() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("serials.log");

        let mismatch = Verification::Mismatch(Mismatch::BoardType {
            found: "MCv5".to_owned(),
        });
        let bench = FakeBench::new(mismatch).confirmations(&[true]);
        let mut controller = CommissioningController::new(bench)
            .with_logbook(Some(Logbook::new(&log_path)));

        controller.run().unwrap();

        assert!(!log_path.exists());
    }

    #[test]
    fn eeprom_runs_even_when_verification_was_negative() {
        // Matches the line tool's behaviour: verification decides logging,
        // not whether the EEPROM gets programmed.
        let bench = FakeBench::new(Verification::Transport {
            message: "no such port".to_owned(),
        })
        .confirmations(&[true]);
        let mut controller = CommissioningController::new(bench).with_eeprom(true);

        controller.run().unwrap();

        assert_eq!(controller.services.eeprom_calls, 1);
    }

    #[test]
    fn declining_the_prompt_ends_the_loop() {
        let bench = FakeBench::new(verified("sr1234")).confirmations(&[false]);
        let mut controller = CommissioningController::new(bench);

        controller.run().unwrap();

        assert_eq!(controller.services.flash_calls, 0);
    }

    #[test]
    fn operator_abort_returns_cleanly() {
        struct AbortingBench;

        impl BoardServices for AbortingBench {
            fn confirm_cycle(&mut self) -> Result<bool, Error> {
                Err(Error::Cancelled)
            }
            fn collect_asset_code(&mut self) -> Result<AssetCode, Error> {
                unreachable!()
            }
            fn flash(&mut self, _: &AssetCode) -> Result<(), Error> {
                unreachable!()
            }
            fn verify(&mut self, _: &AssetCode) -> Verification {
                unreachable!()
            }
            fn program_eeprom(&mut self, _: &AssetCode) -> Result<(), Error> {
                unreachable!()
            }
        }

        let mut controller = CommissioningController::new(AbortingBench);
        assert!(controller.run().is_ok());
    }
}
