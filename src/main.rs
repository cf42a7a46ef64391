use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sysmigrate_lib::config::{MigrateConfig, RunArgs};

const EXIT_PARTIAL: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "sysmigrate", about = "Migrate legacy accounts into the system schema", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconcile every legacy account against the remote and commit the result.
    Run(RunArgs),
}

fn main() {
    let cli = Cli::parse();
    match handle_cli(cli.command) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn handle_cli(command: Commands) -> Result<i32> {
    match command {
        Commands::Run(args) => handle_run(args),
    }
}

fn handle_run(args: RunArgs) -> Result<i32> {
    let config = MigrateConfig::from_args(args).context("resolve configuration")?;
    let _log_guard = sysmigrate_lib::logging::init(config.log_dir.as_deref())
        .context("initialize logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;
    let report = runtime
        .block_on(sysmigrate_lib::run(&config))
        .context("run migration")?;

    let rendered = serde_json::to_string_pretty(&report).context("serialize report")?;
    println!("{rendered}");

    Ok(if report.is_clean() { 0 } else { EXIT_PARTIAL })
}
