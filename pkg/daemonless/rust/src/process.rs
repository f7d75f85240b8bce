// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::{ManagerConfig, StdioPolicy};
use crate::error::{ProcessExitError, SignalError, SpawnError};
use log::{info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::sync::watch;

/// How a child process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
    Unknown(String),
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            ExitOutcome::Exited(code)
        } else if let Some(sig) = status.signal() {
            ExitOutcome::Signaled(sig)
        } else {
            ExitOutcome::Unknown(status.to_string())
        }
    }

    pub fn success(&self) -> bool {
        *self == ExitOutcome::Exited(0)
    }

    pub fn check(&self) -> Result<(), ProcessExitError> {
        match self {
            ExitOutcome::Exited(0) => Ok(()),
            ExitOutcome::Exited(code) => Err(ProcessExitError::NonZero(*code)),
            ExitOutcome::Signaled(sig) => Err(ProcessExitError::Signaled(signal_name(*sig))),
            ExitOutcome::Unknown(reason) => Err(ProcessExitError::Unknown(reason.clone())),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(code) => write!(f, "code {code}"),
            ExitOutcome::Signaled(sig) => write!(f, "signal {}", signal_name(*sig)),
            ExitOutcome::Unknown(reason) => write!(f, "unknown status ({reason})"),
        }
    }
}

fn signal_name(sig: i32) -> String {
    Signal::try_from(sig)
        .map(|s| s.to_string())
        .unwrap_or_else(|_| sig.to_string())
}

fn stdio(policy: StdioPolicy) -> Stdio {
    match policy {
        StdioPolicy::Inherit => Stdio::inherit(),
        StdioPolicy::Null => Stdio::null(),
    }
}

/// One spawned child. The child leads its own process group, so signalling
/// the group reaches every descendant that did not move itself elsewhere.
///
/// A reaper task owns the OS child and publishes its exit on a watch channel;
/// handles are cheap to clone and never leave zombies behind.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    exited: watch::Receiver<Option<ExitOutcome>>,
}

impl ProcessHandle {
    /// Spawn `config.command`. Must be called from within a Tokio runtime.
    pub fn spawn(name: &str, config: &ManagerConfig) -> Result<Self, SpawnError> {
        let (program, args) = config
            .command
            .split_first()
            .ok_or(SpawnError::EmptyCommand)?;
        if program.is_empty() {
            return Err(SpawnError::EmptyCommand);
        }

        let mut cmd = Command::new(program);
        cmd.args(args);

        for (k, v) in &config.env {
            cmd.env(k, v);
        }

        if let Some(ref dir) = config.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(stdio(config.stdout));
        cmd.stderr(stdio(config.stderr));
        cmd.process_group(0);

        // PR_SET_PDEATHSIG fires when the spawning thread exits. Activations run
        // on runtime worker threads, which live as long as the runtime.
        #[cfg(target_os = "linux")]
        {
            // SAFETY: the hook only issues prctl(2), which is async-signal-safe.
            unsafe {
                cmd.pre_exec(|| {
                    nix::sys::prctl::set_pdeathsig(Signal::SIGTERM).map_err(std::io::Error::from)
                });
            }
        }

        let mut child = cmd.spawn().map_err(|source| SpawnError::Io {
            program: program.clone(),
            source,
        })?;

        let Some(pid) = child.id() else {
            return Err(SpawnError::NoPid {
                program: program.clone(),
            });
        };
        info!("[{name}] spawned (pid={pid}, cmd={program})");

        let (tx, rx) = watch::channel(None);
        let reaper_name = name.to_string();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from_status(status),
                Err(e) => {
                    warn!("[{reaper_name}] failed to wait on pid {pid}: {e}");
                    ExitOutcome::Unknown(e.to_string())
                }
            };
            tx.send_replace(Some(outcome));
        });

        Ok(Self {
            name: name.to_string(),
            pid,
            exited: rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Same as the pid: the child is its group's leader.
    pub fn pgid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }

    pub fn is_alive(&self) -> bool {
        self.exited.borrow().is_none()
    }

    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.exited.borrow().clone()
    }

    pub fn signal_group(&self, sig: Signal) -> Result<(), SignalError> {
        info!(
            "[{}] sending {sig} to process group {}",
            self.name, self.pid
        );
        signal::killpg(self.pgid(), sig).map_err(|source| SignalError {
            pgid: self.pid as i32,
            signal: sig,
            source,
        })
    }

    /// Resolves once the child has been reaped.
    pub async fn wait(&self) -> ExitOutcome {
        let mut rx = self.exited.clone();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| ExitOutcome::Unknown("reaper ended without a status".into()))
    }
}
