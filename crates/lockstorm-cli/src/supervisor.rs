//! Waits on forked workers until every one has exited.
//!
//! The wait primitive sits behind [`ChildWaiter`] so the classification loop
//! can be driven by scripted statuses in tests.
//!
//! The `N workers left...` and `pid NNNNNN exited N` lines go straight to
//! stdout with `println!`. They are the console markers external harnesses
//! watch for, so they stay out of the tracing filter.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use lockstorm_config::{log_orch_error, log_orch_info, log_orch_warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// A spawned worker the orchestrator still expects to hear from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: Pid,
    pub directory: PathBuf,
    pub ordinal: usize,
}

/// How a worker ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled { signal: Signal, core_dumped: bool },
}

impl ExitOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitOutcome::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "exited {}", code),
            ExitOutcome::Signaled {
                signal,
                core_dumped,
            } => {
                write!(f, "killed sig {} ({})", *signal as i32, signal.as_str())?;
                if *core_dumped {
                    f.write_str(" core dumped")?;
                }
                Ok(())
            }
        }
    }
}

/// Source of child state changes
pub trait ChildWaiter {
    /// Block until any child changes state
    fn wait_any(&mut self) -> nix::Result<WaitStatus>;
}

/// `waitpid(-1, WUNTRACED)` on the real process table
pub struct SystemWaiter;

impl ChildWaiter for SystemWaiter {
    fn wait_any(&mut self) -> nix::Result<WaitStatus> {
        waitpid(None, Some(WaitPidFlag::WUNTRACED))
    }
}

/// What supervision observed
#[derive(Debug, Default)]
pub struct SupervisionReport {
    pub finished: Vec<(WorkerHandle, ExitOutcome)>,
    /// Workers never reaped because the wait call reported no children left
    pub unaccounted: Vec<WorkerHandle>,
    pub wait_failures: usize,
}

impl SupervisionReport {
    pub fn clean(&self) -> usize {
        self.finished.iter().filter(|(_, o)| o.is_clean()).count()
    }

    pub fn failed(&self) -> usize {
        self.finished
            .iter()
            .filter(|(_, o)| matches!(o, ExitOutcome::Exited(code) if *code != 0))
            .count()
    }

    pub fn signaled(&self) -> usize {
        self.finished
            .iter()
            .filter(|(_, o)| matches!(o, ExitOutcome::Signaled { .. }))
            .count()
    }
}

pub struct Supervisor {
    pending: HashMap<Pid, WorkerHandle>,
    retry_delay: Duration,
}

impl Supervisor {
    pub fn new(handles: Vec<WorkerHandle>, retry_delay: Duration) -> Self {
        Self {
            pending: handles.into_iter().map(|h| (h.pid, h)).collect(),
            retry_delay,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Wait until no worker is pending
    pub fn run<W: ChildWaiter>(mut self, waiter: &mut W) -> SupervisionReport {
        let mut report = SupervisionReport::default();

        while self.pending() > 0 {
            println!("{} workers left...", self.pending());

            let status = match waiter.wait_any() {
                Ok(status) => status,
                Err(Errno::ECHILD) => {
                    log_orch_error!(
                        pending = self.pending.len(),
                        "no children left to wait for"
                    );
                    break;
                }
                Err(e) => {
                    report.wait_failures += 1;
                    log_orch_warn!(error = %e, "waitpid failed, retrying");
                    std::thread::sleep(self.retry_delay);
                    continue;
                }
            };

            if let Some(done) = self.classify(status) {
                report.finished.push(done);
            }
        }

        report.unaccounted = self.pending.into_values().collect();
        report
    }

    fn classify(&mut self, status: WaitStatus) -> Option<(WorkerHandle, ExitOutcome)> {
        let (pid, outcome) = match status {
            WaitStatus::Exited(pid, code) => (pid, ExitOutcome::Exited(code)),
            WaitStatus::Signaled(pid, signal, core_dumped) => (
                pid,
                ExitOutcome::Signaled {
                    signal,
                    core_dumped,
                },
            ),
            other => {
                log_orch_info!("child state change {:?}", other);
                return None;
            }
        };

        let Some(handle) = self.pending.remove(&pid) else {
            log_orch_warn!(pid = pid.as_raw(), "reaped unknown child");
            return None;
        };
        println!(
            "pid {:06} {} (worker {} in {})",
            pid.as_raw(),
            outcome,
            handle.ordinal,
            handle.directory.display()
        );
        Some((handle, outcome))
    }
}
