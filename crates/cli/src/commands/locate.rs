//! Module for the `locate` subcommand: resolution only, the module is never changed.

use clap::Args;
use owo_colors::OwoColorize;
use sigpatch_analysis::Resolution;
use sigpatch_core::store::{JsonStore, ModuleStore};
use sigpatch_transform::{PatchConfig, Patcher};
use std::error::Error;
use std::path::PathBuf;

/// Arguments for the `locate` subcommand.
#[derive(Args)]
pub struct LocateArgs {
    /// Module file to search.
    pub input: PathBuf,
    /// Goal file (JSON).
    #[arg(long)]
    pub goals: PathBuf,
    /// Directory searched for dependency modules; may be repeated.
    #[arg(long = "search-dir", value_name = "DIR")]
    pub search_dirs: Vec<PathBuf>,
}

impl super::Command for LocateArgs {
    fn execute(self) -> Result<(), Box<dyn Error>> {
        let config = PatchConfig::from_file(&self.goals)?;
        let module = JsonStore::new(self.search_dirs).load(&self.input)?;
        let patcher = Patcher::new(config);

        for (goal, resolution) in patcher.locate(&module) {
            match resolution {
                Resolution::Found {
                    method,
                    confidence,
                    strategy,
                } => println!(
                    "{:<24} {} {} ({strategy}, confidence {confidence:.2})",
                    goal.name,
                    "found".green(),
                    module.describe(method)
                ),
                Resolution::Ambiguous {
                    candidates,
                    strategy,
                } => {
                    println!(
                        "{:<24} {} {} candidates ({strategy})",
                        goal.name,
                        "ambiguous".yellow(),
                        candidates.len()
                    );
                    for id in candidates {
                        println!("      candidate {}", module.describe(id));
                    }
                }
                Resolution::NotFound => println!("{:<24} {}", goal.name, "not found".red()),
            }
        }
        Ok(())
    }
}
