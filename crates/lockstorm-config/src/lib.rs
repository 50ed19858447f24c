//! # lockstorm-config
//!
//! Run configuration for lockstorm.
//!
//! Tunables are loaded from:
//! 1. `~/.lockstorm/config.toml` (global)
//! 2. `./lockstorm.toml` or an explicit `--config` file (overrides global)
//! 3. Environment variables (highest priority)
//!
//! Positional run parameters (seed, process count, file count, directories)
//! never come from files; they are combined with the loaded tunables into an
//! immutable [`RunConfig`] that is handed to the orchestrator and, through
//! `fork`, to every worker.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Upper bound on the per-worker working set.
pub const MAX_FILES: usize = 256;
/// Upper bound on `process_count * directories.len()`.
pub const MAX_WORKERS: usize = 256;
/// Rounds each worker runs unless overridden.
pub const DEFAULT_ROUNDS: usize = 100;

pub const DEFAULT_JITTER_MIN_MS: u64 = 1;
pub const DEFAULT_JITTER_MAX_MS: u64 = 10;
pub const DEFAULT_WAIT_RETRY_MS: u64 = 1000;

/// Project-local tunables file, relative to the current directory
pub const PROJECT_CONFIG_FILE: &str = "lockstorm.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("file count {requested} exceeds maximum of {max}")]
    TooManyFiles { requested: usize, max: usize },
    #[error("{requested} workers requested ({process_count} x {directories} dirs), maximum is {max}")]
    TooManyWorkers {
        requested: usize,
        process_count: usize,
        directories: usize,
        max: usize,
    },
    #[error("invalid jitter range {min}..={max} ms")]
    InvalidJitter { min: u64, max: u64 },
    #[error("no target directories given")]
    NoDirectories,
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// File/environment tunables
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Load tunables from standard locations.
    ///
    /// `explicit` replaces the project-local file; unlike the implicit
    /// locations it must exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                merge_tables(&mut merged, read_table(&global_path)?);
            }
        }

        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path.to_path_buf()));
                }
                debug!("Loading config from {:?}", path);
                merge_tables(&mut merged, read_table(path)?);
            }
            None => {
                let project_path = Path::new(PROJECT_CONFIG_FILE);
                if project_path.exists() {
                    debug!("Loading project config from {:?}", project_path);
                    merge_tables(&mut merged, read_table(project_path)?);
                }
            }
        }

        let mut config: Config = toml::Value::Table(merged).try_into()?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Global config path: ~/.lockstorm/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".lockstorm/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(rounds) = env_parse("LOCKSTORM_ROUNDS")? {
            self.worker.rounds = rounds;
        }
        if let Some(min) = env_parse("LOCKSTORM_JITTER_MIN_MS")? {
            self.worker.jitter_min_ms = min;
        }
        if let Some(max) = env_parse("LOCKSTORM_JITTER_MAX_MS")? {
            self.worker.jitter_max_ms = max;
        }
        if let Ok(value) = std::env::var("LOCKSTORM_EXPLICIT_UNLOCK") {
            let flag = match value.trim() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" | "" => Some(false),
                _ => None,
            };
            self.worker.explicit_unlock = flag.ok_or(ConfigError::InvalidEnv {
                var: "LOCKSTORM_EXPLICIT_UNLOCK",
                value,
            })?;
        }
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(contents.parse::<toml::Table>()?)
}

/// Deep-merge `overlay` into `base`; overlay wins on conflicts.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        let incoming = match value {
            toml::Value::Table(incoming) => incoming,
            other => {
                base.insert(key, other);
                continue;
            }
        };
        if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
            merge_tables(existing, incoming);
            continue;
        }
        base.insert(key, toml::Value::Table(incoming));
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    let Ok(value) = std::env::var(var) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidEnv { var, value }),
    }
}

/// Worker engine tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Full open/lock/write/close passes per worker
    pub rounds: usize,
    /// Shortest sleep after an open attempt
    pub jitter_min_ms: u64,
    /// Longest sleep after an open attempt (inclusive)
    pub jitter_max_ms: u64,
    /// Release locks with F_UNLCK before close instead of relying on close
    pub explicit_unlock: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            jitter_min_ms: DEFAULT_JITTER_MIN_MS,
            jitter_max_ms: DEFAULT_JITTER_MAX_MS,
            explicit_unlock: false,
        }
    }
}

impl WorkerConfig {
    pub fn jitter_range(&self) -> RangeInclusive<u64> {
        self.jitter_min_ms..=self.jitter_max_ms
    }
}

/// Supervision loop tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Delay before retrying a failed wait call
    pub wait_retry_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            wait_retry_ms: DEFAULT_WAIT_RETRY_MS,
        }
    }
}

impl SupervisorConfig {
    pub fn wait_retry_delay(&self) -> Duration {
        Duration::from_millis(self.wait_retry_ms)
    }
}

/// Immutable parameters of one run.
///
/// Built once from the command line and loaded [`Config`]; never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub seed: u64,
    /// Worker replicas per directory
    pub process_count: usize,
    /// Working-set size of every worker
    pub file_count: usize,
    pub directories: Vec<PathBuf>,
    pub worker: WorkerConfig,
    pub supervisor: SupervisorConfig,
}

impl RunConfig {
    pub fn new(
        seed: u64,
        process_count: usize,
        file_count: usize,
        directories: Vec<PathBuf>,
        config: Config,
    ) -> Result<Self, ConfigError> {
        if directories.is_empty() {
            return Err(ConfigError::NoDirectories);
        }
        if file_count > MAX_FILES {
            return Err(ConfigError::TooManyFiles {
                requested: file_count,
                max: MAX_FILES,
            });
        }
        let requested = process_count.saturating_mul(directories.len());
        if requested > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers {
                requested,
                process_count,
                directories: directories.len(),
                max: MAX_WORKERS,
            });
        }
        if config.worker.jitter_min_ms > config.worker.jitter_max_ms {
            return Err(ConfigError::InvalidJitter {
                min: config.worker.jitter_min_ms,
                max: config.worker.jitter_max_ms,
            });
        }

        Ok(Self {
            seed,
            process_count,
            file_count,
            directories,
            worker: config.worker,
            supervisor: config.supervisor,
        })
    }

    /// Number of worker processes this run spawns
    pub fn total_workers(&self) -> usize {
        self.process_count * self.directories.len()
    }

    /// Ordinal of replica `replica` in directory `dir_index`, unique within the run
    pub fn worker_ordinal(&self, dir_index: usize, replica: usize) -> usize {
        dir_index * self.process_count + replica
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("/tmp/d{i}"))).collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.worker.rounds, DEFAULT_ROUNDS);
        assert_eq!(config.worker.jitter_range(), 1..=10);
        assert!(!config.worker.explicit_unlock);
        assert_eq!(
            config.supervisor.wait_retry_delay(),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_run_config_accepts_bounds() {
        let run = RunConfig::new(42, 128, MAX_FILES, dirs(2), Config::default()).unwrap();
        assert_eq!(run.total_workers(), MAX_WORKERS);
        assert_eq!(run.worker_ordinal(1, 3), 131);
    }

    #[test]
    fn test_run_config_rejects_too_many_files() {
        let err = RunConfig::new(1, 1, MAX_FILES + 1, dirs(1), Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::TooManyFiles { requested: 257, .. }));
    }

    #[test]
    fn test_run_config_rejects_too_many_workers() {
        let err = RunConfig::new(1, 100, 4, dirs(3), Config::default()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::TooManyWorkers {
                requested: 300,
                ..
            }
        ));
    }

    #[test]
    fn test_run_config_rejects_inverted_jitter() {
        let mut config = Config::default();
        config.worker.jitter_min_ms = 20;
        config.worker.jitter_max_ms = 5;
        let err = RunConfig::new(1, 1, 1, dirs(1), config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidJitter { min: 20, max: 5 }));
    }

    #[test]
    fn test_run_config_requires_directory() {
        let err = RunConfig::new(1, 1, 1, Vec::new(), Config::default()).unwrap_err();
        assert!(matches!(err, ConfigError::NoDirectories));
    }

    #[test]
    fn test_merge_tables_overlay_wins() {
        let mut base: toml::Table = "[worker]\nrounds = 5\njitter_max_ms = 3\n".parse().unwrap();
        let overlay: toml::Table = "[worker]\nrounds = 7\n".parse().unwrap();
        merge_tables(&mut base, overlay);
        let config: Config = toml::Value::Table(base).try_into().unwrap();
        assert_eq!(config.worker.rounds, 7);
        assert_eq!(config.worker.jitter_max_ms, 3);
        assert_eq!(config.worker.jitter_min_ms, DEFAULT_JITTER_MIN_MS);
    }
}
