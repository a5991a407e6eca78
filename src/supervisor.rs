use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::{QueueError, Result};

/// Contents of the worker pool state file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub started_at: DateTime<Utc>,
    pub pids: Vec<u32>,
}

/// Starts and stops worker processes.
///
/// The state file is an inspection and recovery artifact: it lets a later,
/// unrelated invocation find the workers to stop. By default every worker is
/// the current executable run as `worker run`.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    state_file: PathBuf,
    program: Option<PathBuf>,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl ProcessSupervisor {
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        ProcessSupervisor {
            state_file: state_file.into(),
            program: None,
            args: vec!["worker".into(), "run".into()],
            envs: Vec::new(),
        }
    }

    /// Runs `program` with `args` instead of the current executable.
    pub fn program<I, S>(mut self, program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.program = Some(program.into());
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an environment variable for every spawned worker.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Spawns `count` worker processes and records them in the state file.
    ///
    /// Pids already recorded by an earlier `start` are kept, so one `stop`
    /// reaches all of them. If the workers cannot be recorded, the ones
    /// spawned by this call are signalled to stop before the error returns.
    pub fn start(&self, count: usize) -> Result<PoolState> {
        let program = match &self.program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        // Nothing is spawned unless the existing record can be extended.
        let previous = self.read_state()?;

        let mut pids = Vec::with_capacity(count);
        for _ in 0..count {
            let mut cmd = Command::new(&program);
            cmd.args(&self.args)
                .envs(self.envs.iter().map(|(k, v)| (k, v)))
                .stdin(Stdio::null());
            // Own process group: a Ctrl-C in the launching terminal must not
            // reach the workers, only an explicit stop does.
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                cmd.process_group(0);
            }

            match cmd.spawn() {
                Ok(child) => {
                    debug!(pid = child.id(), "Worker process spawned");
                    pids.push(child.id());
                }
                Err(e) => {
                    abandon(&pids);
                    return Err(e.into());
                }
            }
        }

        let state = match previous {
            Some(mut previous) => {
                previous.pids.extend(pids.iter().copied());
                previous
            }
            None => PoolState {
                started_at: Utc::now(),
                pids: pids.clone(),
            },
        };
        if let Err(e) = self.write_state(&state) {
            abandon(&pids);
            return Err(e);
        }

        info!(
            count,
            pids = ?state.pids,
            state_file = %self.state_file.display(),
            "Worker processes started"
        );
        Ok(state)
    }

    /// Signals every recorded worker to stop gracefully and forgets them.
    ///
    /// Returns how many signals were delivered. Does not wait for the workers
    /// to exit. A missing state file means there is nothing to stop.
    pub fn stop(&self) -> Result<usize> {
        let Some(state) = self.read_state()? else {
            debug!(state_file = %self.state_file.display(), "No worker state file");
            return Ok(0);
        };

        let delivered = state.pids.iter().filter(|pid| terminate(**pid)).count();

        match std::fs::remove_file(&self.state_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            delivered,
            recorded = state.pids.len(),
            "Worker processes signalled to stop"
        );
        Ok(delivered)
    }

    /// The recorded pool, or `None` when no state file exists.
    pub fn read_state(&self) -> Result<Option<PoolState>> {
        let raw = match std::fs::read(&self.state_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| QueueError::StateFileError {
                path: self.state_file.clone(),
                source,
            })
    }

    fn write_state(&self, state: &PoolState) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let raw = serde_json::to_vec_pretty(state).map_err(|source| QueueError::StateFileError {
            path: self.state_file.clone(),
            source,
        })?;
        std::fs::write(&self.state_file, raw)?;
        Ok(())
    }
}

/// Stops workers spawned by a `start` that failed to record them.
fn abandon(pids: &[u32]) {
    if pids.is_empty() {
        return;
    }
    let signalled = pids.iter().filter(|pid| terminate(**pid)).count();
    warn!(signalled, pids = ?pids, "Stopped worker processes that could not be recorded");
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            warn!(pid, error = %e, "Could not signal worker process");
            false
        }
    }
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> bool {
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) => status.success(),
        Err(e) => {
            warn!(pid, error = %e, "Could not signal worker process");
            false
        }
    }
}
