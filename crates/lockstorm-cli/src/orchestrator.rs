//! Fans workers out across the target directories and supervises them.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use lockstorm_config::{log_orch_debug, log_orch_info, log_orch_warn, log_worker_error, RunConfig};
use lockstorm_worker::{Jitter, JitterSource};
use nix::errno::Errno;
use nix::unistd::{chdir, fork, ForkResult};
use thiserror::Error;

use crate::supervisor::{SupervisionReport, Supervisor, SystemWaiter, WorkerHandle};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("fork failed after {spawned} workers: {source}")]
    Fork {
        spawned: usize,
        #[source]
        source: Errno,
    },
}

/// Fork `process_count` workers per directory.
///
/// Returns only in the orchestrator; children never come back from here.
/// On fork failure the workers already started keep running on their own.
pub fn spawn_workers(run: &RunConfig) -> Result<Vec<WorkerHandle>, OrchestratorError> {
    // Seeded once; children inherit it and pick their own stream.
    let jitter = JitterSource::new(run.seed, run.worker.jitter_range());
    let mut handles = Vec::with_capacity(run.total_workers());

    for (dir_index, dir) in run.directories.iter().enumerate() {
        for replica in 0..run.process_count {
            let ordinal = run.worker_ordinal(dir_index, replica);

            // Anything still buffered would be printed again by the child.
            let _ = std::io::stdout().flush();

            // SAFETY: the orchestrator is single-threaded, so the child
            // cannot inherit a lock held by another thread.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    log_orch_debug!(pid = child.as_raw(), ordinal, dir = %dir.display(), "started worker");
                    handles.push(WorkerHandle {
                        pid: child,
                        directory: dir.clone(),
                        ordinal,
                    });
                }
                Ok(ForkResult::Child) => worker_main(run, dir, jitter.stream(ordinal)),
                Err(source) => {
                    return Err(OrchestratorError::Fork {
                        spawned: handles.len(),
                        source,
                    })
                }
            }
        }
    }

    Ok(handles)
}

/// Body of a forked child: enter the target directory, run, exit.
fn worker_main(run: &RunConfig, dir: &Path, jitter: Jitter) -> ! {
    if let Err(e) = chdir(dir) {
        log_worker_error!(
            pid = std::process::id(),
            dir = %dir.display(),
            error = %e,
            "chdir failed"
        );
        std::process::exit(1);
    }

    lockstorm_worker::run_in_cwd(run, jitter);
    let _ = std::io::stdout().flush();
    std::process::exit(0);
}

/// Spawn every worker and wait for all of them
pub fn run(run: &RunConfig) -> Result<SupervisionReport> {
    log_orch_info!(
        seed = run.seed,
        nproc = run.process_count,
        nfiles = run.file_count,
        dirs = run.directories.len(),
        rounds = run.worker.rounds,
        explicit_unlock = run.worker.explicit_unlock,
        "starting workers"
    );

    let handles = spawn_workers(run)?;
    let supervisor = Supervisor::new(handles, run.supervisor.wait_retry_delay());
    let report = supervisor.run(&mut SystemWaiter);

    if report.clean() != report.finished.len() || !report.unaccounted.is_empty() {
        log_orch_warn!(
            wait_failures = report.wait_failures,
            failed = report.failed(),
            signaled = report.signaled(),
            unaccounted = report.unaccounted.len(),
            "some workers did not exit cleanly"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ExitOutcome;
    use lockstorm_config::testing::TestEnvironment;

    #[test]
    fn test_worker_that_cannot_enter_directory_exits_one() {
        let env = TestEnvironment::new().unwrap();
        let missing = env.missing_dir("x");
        let config = env.run_config(11, 2, 2, vec![missing.clone()], 1).unwrap();

        let report = super::run(&config).unwrap();

        assert_eq!(report.finished.len(), 2);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.clean(), 0);
        assert!(report.unaccounted.is_empty());
        for (handle, outcome) in &report.finished {
            assert_eq!(*outcome, ExitOutcome::Exited(1));
            assert_eq!(handle.directory, missing);
        }
        assert!(!missing.exists());
    }
}
