//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A private temporary root
//! - Target directories for workers
//! - Listing what a run left behind
//!
//! # Usage
//!
//! ```ignore
//! use lockstorm_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new()?;
//! let target = env.target_dir("t1")?;
//! // run workers against `target`, then inspect env.file_names(&target)
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, RunConfig, WorkerConfig};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated scratch area for worker and orchestrator tests
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Root holding every target directory of this test
    pub root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path().to_path_buf();

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            test_id,
        })
    }

    /// Create (if needed) and return a target directory under the root
    pub fn target_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let path = self.root.join(name);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Path under the root that is guaranteed not to exist
    pub fn missing_dir(&self, name: &str) -> PathBuf {
        self.root.join(format!("missing-{}-{}", self.test_id, name))
    }

    /// Sorted names of regular files directly inside `dir`
    pub fn file_names(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Fast worker settings: few rounds, no jitter
    pub fn quick_worker_config(rounds: usize) -> WorkerConfig {
        WorkerConfig {
            rounds,
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            explicit_unlock: false,
        }
    }

    /// Run configuration over the given directories with quick worker settings
    pub fn run_config(
        &self,
        seed: u64,
        process_count: usize,
        file_count: usize,
        directories: Vec<PathBuf>,
        rounds: usize,
    ) -> anyhow::Result<RunConfig> {
        let config = Config {
            worker: Self::quick_worker_config(rounds),
            ..Config::default()
        };
        Ok(RunConfig::new(
            seed,
            process_count,
            file_count,
            directories,
            config,
        )?)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
