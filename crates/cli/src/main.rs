use clap::Parser;
use sigpatch_cli::commands::{Cmd, Command};

/// sigpatch CLI
///
/// sigpatch locates methods in an obfuscated module by content and structure rather than by
/// name, applies verified patch operations to them, and writes the patched module
#[derive(Parser)]
#[command(name = "sigpatch")]
#[command(about = "sigpatch: signature-based module patcher")]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

/// Runs the sigpatch CLI with the provided arguments.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_ansi(false)
        .without_time()
        .init();

    cli.command.execute()
}
