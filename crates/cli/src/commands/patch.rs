//! Module for the `patch` subcommand, which runs a goal file against a module and writes the
//! patched module.
//!
//! Nothing is written when the module fails to load or when the patched module does not
//! verify.

use clap::Args;
use owo_colors::OwoColorize;
use sigpatch_core::store::{JsonStore, ModuleStore, default_output_path};
use sigpatch_transform::{Outcome, PatchConfig, PatchSummary, Patcher, Verdict};
use std::error::Error;
use std::path::PathBuf;

use crate::commands::CliError;

/// Arguments for the `patch` subcommand.
#[derive(Args)]
pub struct PatchArgs {
    /// Module file to patch.
    pub input: PathBuf,
    /// Goal file (JSON).
    #[arg(long)]
    pub goals: PathBuf,
    /// Output path [default: <stem>_patched.<ext> next to the input]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Directory searched for dependency modules; may be repeated.
    #[arg(long = "search-dir", value_name = "DIR")]
    pub search_dirs: Vec<PathBuf>,
    /// Print the summary as JSON.
    #[arg(long)]
    pub json: bool,
}

impl super::Command for PatchArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let PatchArgs {
            input,
            goals,
            output,
            search_dirs,
            json,
        } = self;

        let config = PatchConfig::from_file(&goals)?;
        let store = JsonStore::new(search_dirs);
        let mut module = store.load(&input)?;

        let summary = Patcher::new(config).run(&mut module);
        if json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print_summary(&summary);
        }

        if !summary.ready {
            return Err(CliError::NotReady(summary.validation_errors.len()).into());
        }

        let path = output.unwrap_or_else(|| default_output_path(&input));
        let receipt = store.write(&module, &path)?;
        if !json {
            println!(
                "wrote {} ({} bytes, sha3 {})",
                receipt.path.display(),
                receipt.bytes,
                receipt.digest
            );
        }
        Ok(())
    }
}

/// Prints one line per goal plus target, candidate and validation details.
pub(crate) fn print_summary(summary: &PatchSummary) {
    println!("{}", summary.module.bold());
    for goal in &summary.goals {
        let verdict = match goal.verdict {
            Verdict::Found => "found".green().to_string(),
            Verdict::Ambiguous => "ambiguous".yellow().to_string(),
            Verdict::NotFound => "not found".red().to_string(),
        };
        let outcome = match &goal.outcome {
            Outcome::Applied { methods } => format!("{} {}", "applied".green(), methods.join(", ")),
            Outcome::AlreadyApplied => "already applied".cyan().to_string(),
            Outcome::Rejected { reason } => format!("{} {reason}", "rejected".red()),
        };
        println!("  {:<24} {verdict} / {outcome}", goal.goal);
        if let Some(target) = &goal.target {
            match goal.strategy {
                Some(strategy) => println!(
                    "      target {target} ({strategy}, confidence {:.2})",
                    goal.confidence
                ),
                None => println!("      target {target}"),
            }
        }
        for candidate in &goal.candidates {
            println!("      candidate {}", candidate.dimmed());
        }
    }
    for error in &summary.validation_errors {
        println!("  {} {error}", "invalid".red());
    }
    println!(
        "{} applied, {} rejected",
        summary.applied(),
        summary.rejected()
    );
}
