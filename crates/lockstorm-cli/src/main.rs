//! # lockstorm
//!
//! Stress tester for Linux open-file-description locks: forks workers across
//! target directories and lets them fight over a shared set of files.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use lockstorm_config::logging::{init_logging, LogLevel};
use lockstorm_config::{log_orch_error, Config, RunConfig};

mod orchestrator;
mod preflight;
mod supervisor;

/// Open/lock/write/close contention across many processes
#[derive(Parser, Debug)]
#[command(name = "lockstorm")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Seed for every worker's jitter stream
    #[arg(value_name = "SEED")]
    seed: u64,

    /// Worker processes per directory
    #[arg(value_name = "PROC_COUNT")]
    process_count: usize,

    /// Files in each worker's working set
    #[arg(value_name = "FILE_COUNT")]
    file_count: usize,

    /// Writable target directories
    #[arg(value_name = "DIR", required = true, num_args = 1..)]
    directories: Vec<PathBuf>,

    /// Rounds per worker
    #[arg(long)]
    rounds: Option<usize>,

    /// Shortest post-open sleep
    #[arg(long)]
    jitter_min_ms: Option<u64>,

    /// Longest post-open sleep
    #[arg(long)]
    jitter_max_ms: Option<u64>,

    /// Unlock with F_UNLCK before closing instead of relying on close
    #[arg(long)]
    explicit_unlock: bool,

    /// Tunables file (replaces ./lockstorm.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Command-line flags win over files and environment
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(rounds) = self.rounds {
            config.worker.rounds = rounds;
        }
        if let Some(min) = self.jitter_min_ms {
            config.worker.jitter_min_ms = min;
        }
        if let Some(max) = self.jitter_max_ms {
            config.worker.jitter_max_ms = max;
        }
        if self.explicit_unlock {
            config.worker.explicit_unlock = true;
        }
    }
}

/// Parse arguments; missing positionals print usage and exit 0.
fn parse_args() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::MissingRequiredArgument
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            let _ = Cli::command().print_help();
            std::process::exit(0);
        }
        Err(e) => e.exit(),
    }
}

fn main() -> Result<()> {
    let cli = parse_args();
    init_logging(LogLevel::Info);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);

    let checks = preflight::run_preflight(&cli.directories);
    if !checks.can_spawn() {
        for err in &checks.errors {
            log_orch_error!("{}", err);
        }
        bail!(
            "{} of {} target directories are not writable",
            checks.errors.len(),
            checks.checked.len()
        );
    }

    let run = RunConfig::new(
        cli.seed,
        cli.process_count,
        cli.file_count,
        cli.directories,
        config,
    )
    .context("Invalid run configuration")?;

    println!("seed = {}, nproc = {}", run.seed, run.process_count);

    let report = orchestrator::run(&run)?;

    println!(
        "workers: {} finished, {} clean, {} failed, {} signaled, {} unaccounted",
        report.finished.len(),
        report.clean(),
        report.failed(),
        report.signaled(),
        report.unaccounted.len()
    );
    println!("end of test.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_positionals_and_dirs() {
        let cli = Cli::try_parse_from(["lockstorm", "42", "2", "4", "/tmp/t1", "/tmp/t2"]).unwrap();
        assert_eq!(cli.seed, 42);
        assert_eq!(cli.process_count, 2);
        assert_eq!(cli.file_count, 4);
        assert_eq!(
            cli.directories,
            vec![PathBuf::from("/tmp/t1"), PathBuf::from("/tmp/t2")]
        );
        assert!(!cli.explicit_unlock);
    }

    #[test]
    fn test_missing_dir_is_missing_argument() {
        let err = Cli::try_parse_from(["lockstorm", "42", "2", "4"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_non_numeric_count_rejected() {
        let err = Cli::try_parse_from(["lockstorm", "42", "two", "4", "/tmp"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "lockstorm",
            "--rounds",
            "7",
            "--jitter-max-ms",
            "3",
            "--explicit-unlock",
            "1",
            "1",
            "1",
            "/tmp",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.worker.rounds, 7);
        assert_eq!(config.worker.jitter_max_ms, 3);
        assert_eq!(config.worker.jitter_min_ms, 1);
        assert!(config.worker.explicit_unlock);
    }
}
