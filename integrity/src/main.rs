//! `fio-integrity`: write a known pattern to a storage target and keep verifying it.
//!
//! Startup always runs recovery. With `--init` (or `INIT` set) the process
//! exits after recovery; otherwise it enters the write/verify loop and only
//! returns on a fatal error.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::builder::FalseyValueParser;

use integrity::error::exit_code_for;
use integrity::exit_codes;
use integrity::io::config::{ConfigOverrides, ConfigSource, DEFAULT_CONFIG_PATH};
use integrity::io::executor::FioExecutor;
use integrity::io::journal::Journal;
use integrity::logging;
use integrity::looping::{LoopLimits, run_loop};
use integrity::recovery::run_recovery;

#[derive(Parser, Debug)]
#[command(
    name = "fio-integrity",
    version,
    about = "Crash-consistent pattern write/verify harness for storage targets"
)]
struct Cli {
    /// Config file (JSON, or TOML with a `.toml` extension). Reloaded every iteration.
    #[arg(long, env = "IO_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding the target; overrides `io_data_path`.
    #[arg(long, env = "IO_DATA_PATH")]
    data_path: Option<PathBuf>,

    /// Directory holding the markers and transaction log; overrides `io_transaction_log_dir`.
    #[arg(long, env = "IO_TRANSACTION_LOG_DIR")]
    transaction_log_dir: Option<PathBuf>,

    /// fio executable.
    #[arg(long, env = "FIO_BINARY", default_value = "fio")]
    fio_binary: PathBuf,

    /// Run recovery only, then exit.
    #[arg(long, env = "INIT", value_parser = FalseyValueParser::new())]
    init: bool,

    /// Stop the loop after this many iterations.
    #[arg(long)]
    max_iterations: Option<u64>,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let source = ConfigSource::new(
        cli.config,
        ConfigOverrides {
            data_path: cli.data_path,
            transaction_log_dir: cli.transaction_log_dir,
        },
    );
    let startup = source.load()?;
    let journal = Journal::from_config(&startup)?;
    let executor = FioExecutor::new(cli.fio_binary);

    run_recovery(&source, &executor, &journal)?;
    if cli.init {
        return Ok(());
    }

    run_loop(
        &source,
        &executor,
        &journal,
        LoopLimits {
            max_iterations: cli.max_iterations,
        },
        |_| {},
    )?;
    Ok(())
}
