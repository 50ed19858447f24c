//! The contention loop run by every worker process.
//!
//! A round opens the whole working set in index order, locking and writing
//! each write-intent slot right after it opens, then closes everything. Locks
//! are only dropped at close (or by the optional explicit unlock), and slots
//! are always visited in ascending order, so two workers in blocking rounds
//! never wait on each other in a cycle.

use std::fs::File;
use std::path::PathBuf;

use lockstorm_config::{log_worker_debug, log_worker_info, log_worker_warn, RunConfig, WorkerConfig};

use crate::filename;
use crate::jitter::Jitter;
use crate::ops::{self, AccessMode, LockMode, OpError};

/// Bytes written to every write-intent slot each round
pub const WRITE_PAYLOAD: &[u8] = b"abc\0";

/// One entry of a worker's working set
#[derive(Debug)]
pub struct WorkingFile {
    pub name: String,
    pub access: AccessMode,
    handle: Option<File>,
    /// Lock acquired this round, so an explicit unlock is meaningful
    locked: bool,
}

impl WorkingFile {
    fn new(index: usize) -> Self {
        Self {
            name: filename::derive(index),
            access: AccessMode::for_index(index),
            handle: None,
            locked: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }
}

/// Outcome counters for one round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundStats {
    pub round: usize,
    pub lock_mode: LockMode,
    pub opened: usize,
    pub open_failed: usize,
    pub locked: usize,
    pub lock_failed: usize,
    pub written: usize,
    pub write_failed: usize,
    pub unlocked: usize,
    pub unlock_failed: usize,
    pub closed: usize,
    pub close_failed: usize,
}

impl RoundStats {
    fn new(round: usize) -> Self {
        Self {
            round,
            lock_mode: LockMode::for_round(round),
            opened: 0,
            open_failed: 0,
            locked: 0,
            lock_failed: 0,
            written: 0,
            write_failed: 0,
            unlocked: 0,
            unlock_failed: 0,
            closed: 0,
            close_failed: 0,
        }
    }

    pub fn close_attempts(&self) -> usize {
        self.closed + self.close_failed
    }

    pub fn failures(&self) -> usize {
        self.open_failed + self.lock_failed + self.write_failed + self.unlock_failed + self.close_failed
    }
}

/// Per-round history of a whole worker run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub rounds: Vec<RoundStats>,
}

impl WorkerStats {
    pub fn lock_modes(&self) -> Vec<LockMode> {
        self.rounds.iter().map(|r| r.lock_mode).collect()
    }

    pub fn total_failures(&self) -> usize {
        self.rounds.iter().map(RoundStats::failures).sum()
    }

    pub fn total_written(&self) -> usize {
        self.rounds.iter().map(|r| r.written).sum()
    }
}

/// Contention loop over one directory
pub struct Worker {
    root: PathBuf,
    pid: u32,
    files: Vec<WorkingFile>,
    jitter: Jitter,
    rounds: usize,
    explicit_unlock: bool,
}

impl Worker {
    /// Worker for `root` using the run's file count and worker tunables
    pub fn new(root: impl Into<PathBuf>, run: &RunConfig, jitter: Jitter) -> Self {
        Self::with_settings(root, run.file_count, &run.worker, jitter)
    }

    pub fn with_settings(
        root: impl Into<PathBuf>,
        file_count: usize,
        settings: &WorkerConfig,
        jitter: Jitter,
    ) -> Self {
        Self {
            root: root.into(),
            pid: std::process::id(),
            files: (0..file_count).map(WorkingFile::new).collect(),
            jitter,
            rounds: settings.rounds,
            explicit_unlock: settings.explicit_unlock,
        }
    }

    pub fn files(&self) -> &[WorkingFile] {
        &self.files
    }

    /// Run every configured round
    pub fn run(&mut self) -> WorkerStats {
        log_worker_debug!(
            pid = self.pid,
            files = self.files.len(),
            rounds = self.rounds,
            explicit_unlock = self.explicit_unlock,
            "worker started"
        );

        let mut stats = WorkerStats::default();
        for round in 0..self.rounds {
            stats.rounds.push(self.run_round(round));
        }

        log_worker_info!(
            pid = self.pid,
            rounds = stats.rounds.len(),
            failures = stats.total_failures(),
            "worker finished"
        );
        stats
    }

    /// One full open/operate/close pass over the working set
    pub fn run_round(&mut self, round: usize) -> RoundStats {
        let mut stats = RoundStats::new(round);
        for index in 0..self.files.len() {
            self.open_and_operate(index, &mut stats);
        }
        self.close_all(&mut stats);
        stats
    }

    fn open_and_operate(&mut self, index: usize, stats: &mut RoundStats) {
        let pid = self.pid;
        let slot = &mut self.files[index];
        slot.locked = false;

        match ops::open_slot(&self.root, &slot.name, slot.access) {
            Ok(file) => {
                slot.handle = Some(file);
                stats.opened += 1;
            }
            Err(err) => {
                slot.handle = None;
                stats.open_failed += 1;
                report(pid, &err);
            }
        }

        self.jitter.pause();

        let slot = &mut self.files[index];
        let Some(file) = slot.handle.as_ref() else {
            return;
        };
        if slot.access != AccessMode::Write {
            return;
        }

        match ops::lock_slot(file, &slot.name, stats.lock_mode) {
            Ok(()) => {
                slot.locked = true;
                stats.locked += 1;
            }
            Err(err) => {
                stats.lock_failed += 1;
                report(pid, &err);
            }
        }

        // Written whether or not the lock was granted.
        match ops::write_slot(file, &slot.name, WRITE_PAYLOAD) {
            Ok(_) => stats.written += 1,
            Err(err) => {
                stats.write_failed += 1;
                report(pid, &err);
            }
        }

        if self.explicit_unlock && slot.locked {
            match ops::unlock_slot(file, &slot.name) {
                Ok(()) => {
                    slot.locked = false;
                    stats.unlocked += 1;
                }
                Err(err) => {
                    stats.unlock_failed += 1;
                    report(pid, &err);
                }
            }
        }
    }

    fn close_all(&mut self, stats: &mut RoundStats) {
        for slot in &mut self.files {
            slot.locked = false;
            let Some(file) = slot.handle.take() else {
                continue;
            };
            match ops::close_slot(file, &slot.name) {
                Ok(()) => stats.closed += 1,
                Err(err) => {
                    stats.close_failed += 1;
                    report(self.pid, &err);
                }
            }
        }
    }
}

fn report(pid: u32, err: &OpError) {
    match err.errno() {
        Some(errno) => log_worker_warn!(
            pid = pid,
            file = err.name(),
            op = err.op(),
            errno,
            "{}",
            err
        ),
        None => log_worker_warn!(pid = pid, file = err.name(), op = err.op(), "{}", err),
    }
}
