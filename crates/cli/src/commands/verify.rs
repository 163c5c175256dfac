//! Module for the `verify` subcommand, which checks stack balance and branch targets of every
//! method body.

use clap::Args;
use owo_colors::OwoColorize;
use sigpatch_core::store::{JsonStore, ModuleStore};
use sigpatch_core::validator::validate_module;
use std::error::Error;
use std::path::PathBuf;

use crate::commands::CliError;

/// Arguments for the `verify` subcommand.
#[derive(Args)]
pub struct VerifyArgs {
    /// Module file to verify.
    pub input: PathBuf,
    /// Directory searched for dependency modules; may be repeated.
    #[arg(long = "search-dir", value_name = "DIR")]
    pub search_dirs: Vec<PathBuf>,
}

impl super::Command for VerifyArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let module = JsonStore::new(self.search_dirs).load(&self.input)?;
        match validate_module(&module) {
            Ok(()) => {
                println!(
                    "{} {} methods verified",
                    "ok".green(),
                    module.methods().len()
                );
                Ok(())
            }
            Err(errors) => {
                for error in &errors {
                    println!("{} {error}", "invalid".red());
                }
                Err(CliError::Invalid(errors.len()).into())
            }
        }
    }
}
