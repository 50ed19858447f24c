//! # lockstorm-worker
//!
//! Everything that runs inside a forked worker process: filename derivation,
//! seeded jitter, single-attempt file operations and the contention loop.
//!
//! Locks are Linux open-file-description locks (`F_OFD_SETLK[W]`), owned by
//! the open file description rather than the process.

#[cfg(not(target_os = "linux"))]
compile_error!("lockstorm-worker needs Linux open-file-description locks");

pub mod engine;
pub mod filename;
pub mod jitter;
pub mod ops;

pub use engine::{RoundStats, Worker, WorkerStats, WorkingFile, WRITE_PAYLOAD};
pub use jitter::{Jitter, JitterSource};
pub use ops::{AccessMode, LockMode, LockRequest, OpError, OpResult};

use lockstorm_config::RunConfig;

/// Worker entry point for a forked child whose cwd is already the target.
pub fn run_in_cwd(run: &RunConfig, jitter: Jitter) -> WorkerStats {
    Worker::new(".", run, jitter).run()
}
