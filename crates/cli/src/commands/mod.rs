use clap::Subcommand;
use std::error::Error;

pub mod locate;
pub mod patch;
pub mod verify;

use thiserror::Error;

/// Errors raised by the commands themselves; library errors pass through unchanged.
#[derive(Debug, Error)]
pub enum CliError {
    /// The patched module failed whole-module validation and was rolled back.
    #[error("patched module did not verify ({0} method(s)); nothing written")]
    NotReady(usize),
    /// The input module does not verify.
    #[error("{0} method(s) failed verification")]
    Invalid(usize),
}

/// CLI subcommands for sigpatch.
#[derive(Subcommand)]
pub enum Cmd {
    /// Locate every goal's target, apply the goals and write the patched module.
    Patch(patch::PatchArgs),
    /// Resolve every goal's target without patching.
    Locate(locate::LocateArgs),
    /// Verify every method body of a module.
    Verify(verify::VerifyArgs),
}

/// Trait for executing CLI subcommands.
pub trait Command {
    /// Executes the subcommand.
    ///
    /// # Returns
    /// A `Result` indicating success or an error if execution fails.
    fn execute(self) -> Result<(), Box<dyn Error>>;
}

impl Command for Cmd {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Patch(args) => args.execute(),
            Cmd::Locate(args) => args.execute(),
            Cmd::Verify(args) => args.execute(),
        }
    }
}
