// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Lifecycle state machine for one on-demand daemon.
//!
//! Every run (spawn to stop) gets a fresh generation number and
//! [`CancellationToken`]. Background watchers carry the generation they were
//! started for and re-check it under the lock before acting, so an idle expiry
//! or exit notification from an older run can never touch a newer one.

use crate::config::ManagerConfig;
use crate::error::{SignalError, SpawnError};
use crate::process::{ExitOutcome, ProcessHandle};
use crate::state::ManagerState;
use crate::timer::{Expiry, IdleTimer};
use humantime::format_duration;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;

/// How long [`Manager::shutdown`] waits for a process on top of its
/// `stop_timeout`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Point-in-time view of a manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStatus {
    pub name: String,
    pub state: ManagerState,
    pub pid: Option<u32>,
    pub idle_deadline: Option<Instant>,
    /// Number of runs claimed so far.
    pub generation: u64,
    pub last_exit: Option<ExitOutcome>,
}

struct RunState {
    state: ManagerState,
    active: Option<ProcessHandle>,
    generation: u64,
    token: CancellationToken,
    last_exit: Option<ExitOutcome>,
}

impl RunState {
    fn transition(&mut self, name: &str, next: ManagerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {next}",
            self.state
        );
        debug!("[{name}] {} -> {next}", self.state);
        self.state = next;
    }

    fn is_current(&self, generation: u64, state: ManagerState) -> bool {
        self.generation == generation && self.state == state
    }

    /// Finish the current run: cancel its watchers, move to `next` and signal
    /// the process group. The transition happens even if the signal fails.
    fn end_run(&mut self, name: &str, next: ManagerState) -> Result<(), SignalError> {
        self.token.cancel();
        self.transition(name, next);
        match self.active.take() {
            Some(handle) => handle.signal_group(Signal::SIGTERM),
            None => Ok(()),
        }
    }
}

struct Shared {
    name: String,
    config: ManagerConfig,
    timer: IdleTimer,
    run: RwLock<RunState>,
    /// Runs between a successful spawn and the re-lock in `activate`.
    #[cfg(test)]
    spawn_hook: std::sync::Mutex<Option<Box<dyn FnOnce(u32) + Send>>>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, RunState> {
        self.run.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.run.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Starts a command on demand and stops it after `idle` without activations.
///
/// Cloning is cheap and every clone drives the same state machine. All
/// operations are synchronous but must be called from within a Tokio runtime,
/// since activation spawns the process reaper and the watchers.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Shared>,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        Self {
            inner: Arc::new(Shared {
                name: config.display_name(),
                timer: IdleTimer::new(config.idle),
                config,
                run: RwLock::new(RunState {
                    state: ManagerState::Stopped,
                    active: None,
                    generation: 0,
                    token: cancelled,
                    last_exit: None,
                }),
                #[cfg(test)]
                spawn_hook: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Make sure the process is running and push back its idle deadline.
    ///
    /// Concurrent callers collapse into a single spawn: the caller that claims
    /// `Starting` spawns, everyone else returns `Ok(())` immediately. After
    /// [`terminate`](Self::terminate) this is a no-op.
    pub fn activate(&self) -> Result<(), SpawnError> {
        let name = self.name();
        let idle = self.inner.config.idle;

        let (generation, token) = {
            let mut run = self.inner.write();
            match run.state {
                ManagerState::Terminated | ManagerState::Starting => return Ok(()),
                ManagerState::Running => {
                    self.inner.timer.reset(idle);
                    return Ok(());
                }
                ManagerState::Stopped => {}
            }
            run.generation += 1;
            run.token = CancellationToken::new();
            run.transition(name, ManagerState::Starting);
            (run.generation, run.token.clone())
        };

        info!("[{name}] activating");
        let spawned = ProcessHandle::spawn(name, &self.inner.config);
        #[cfg(test)]
        self.run_spawn_hook(&spawned);

        let mut run = self.inner.write();
        let current = run.is_current(generation, ManagerState::Starting);
        match spawned {
            Err(e) => {
                if current {
                    run.token.cancel();
                    run.transition(name, ManagerState::Stopped);
                }
                warn!("[{name}] activation failed: {e}");
                Err(e)
            }
            Ok(handle) if !current => {
                drop(run);
                info!(
                    "[{name}] run superseded while starting, stopping pid {}",
                    handle.pid()
                );
                if let Err(e) = handle.signal_group(Signal::SIGTERM) {
                    warn!("[{name}] {e}");
                }
                // The token was cancelled by whoever superseded the run, so the
                // exit watcher goes straight to reaping.
                self.spawn_exit_watcher(generation, token, handle);
                Ok(())
            }
            Ok(handle) => {
                run.active = Some(handle.clone());
                run.transition(name, ManagerState::Running);
                self.inner.timer.reset(idle);
                drop(run);
                info!(
                    "[{name}] will run until idle for {}",
                    format_duration(idle)
                );
                self.spawn_idle_watcher(generation, token.clone());
                self.spawn_exit_watcher(generation, token, handle);
                Ok(())
            }
        }
    }

    /// Send SIGTERM to the current run's process group and return to `Stopped`.
    /// Does not wait for the process to exit. No-op unless a run is live.
    pub fn stop(&self) -> Result<(), SignalError> {
        let name = self.name();
        let mut run = self.inner.write();
        if !run.state.is_live() {
            return Ok(());
        }
        info!("[{name}] stopping");
        run.end_run(name, ManagerState::Stopped)
            .inspect_err(|e| warn!("[{name}] {e}"))
    }

    /// Stop the current run, if any, and refuse all future activations.
    pub fn terminate(&self) -> Result<(), SignalError> {
        self.terminate_run().1
    }

    /// [`terminate`](Self::terminate), then wait for the terminated run to be
    /// reaped. The exit watcher escalates to SIGKILL after `stop_timeout`; past
    /// that plus a grace period the process is left behind with a warning.
    pub async fn shutdown(&self) -> Result<(), SignalError> {
        let (handle, result) = self.terminate_run();
        let Some(handle) = handle else {
            return result;
        };
        let limit = self.inner.config.stop_timeout.unwrap_or_default() + SHUTDOWN_GRACE;
        if timeout(limit, handle.wait()).await.is_err() {
            warn!(
                "[{}] pid {} still running {} after shutdown, giving up",
                self.name(),
                handle.pid(),
                format_duration(limit)
            );
        }
        result
    }

    /// Move to `Terminated`, returning the handle of the run it ended.
    fn terminate_run(&self) -> (Option<ProcessHandle>, Result<(), SignalError>) {
        let name = self.name();
        let mut run = self.inner.write();
        if run.state == ManagerState::Terminated {
            return (None, Ok(()));
        }
        info!("[{name}] terminating");
        if run.state.is_live() {
            let handle = run.active.clone();
            let result = run
                .end_run(name, ManagerState::Terminated)
                .inspect_err(|e| warn!("[{name}] {e}"));
            (handle, result)
        } else {
            run.transition(name, ManagerState::Terminated);
            (None, Ok(()))
        }
    }

    pub fn status(&self) -> ManagerState {
        self.inner.read().state
    }

    pub fn snapshot(&self) -> ManagerStatus {
        let run = self.inner.read();
        ManagerStatus {
            name: self.inner.name.clone(),
            state: run.state,
            pid: run.active.as_ref().map(ProcessHandle::pid),
            idle_deadline: (run.state == ManagerState::Running).then(|| self.inner.timer.deadline()),
            generation: run.generation,
            last_exit: run.last_exit.clone(),
        }
    }

    fn spawn_idle_watcher(&self, generation: u64, token: CancellationToken) {
        let manager = self.clone();
        tokio::spawn(async move {
            while manager.inner.timer.expired(&token).await == Expiry::Fired {
                if manager.on_idle_expired(generation) {
                    break;
                }
            }
        });
    }

    fn spawn_exit_watcher(&self, generation: u64, token: CancellationToken, handle: ProcessHandle) {
        let manager = self.clone();
        tokio::spawn(async move {
            let (outcome, stopped) = tokio::select! {
                outcome = handle.wait() => (outcome, false),
                _ = token.cancelled() => (manager.reap_stopped(&handle).await, true),
            };
            manager.on_exit(generation, &handle, outcome, stopped);
            if !stopped {
                manager.sweep_group(&handle);
            }
        });
    }

    /// SIGTERM whatever is left of a group whose leader exited on its own.
    fn sweep_group(&self, handle: &ProcessHandle) {
        match handle.signal_group(Signal::SIGTERM) {
            Ok(()) => info!(
                "[{}] terminated leftover processes of group {}",
                self.name(),
                handle.pid()
            ),
            Err(e) if e.source == Errno::ESRCH => {
                debug!("[{}] group {} already empty", self.name(), handle.pid())
            }
            Err(e) => warn!("[{}] {e}", self.name()),
        }
    }

    /// Returns false when an activation pushed the deadline back after the
    /// timer fired, in which case the watcher keeps waiting.
    fn on_idle_expired(&self, generation: u64) -> bool {
        let name = self.name();
        let mut run = self.inner.write();
        if !run.is_current(generation, ManagerState::Running) {
            debug!("[{name}] ignoring idle expiry of stale run {generation}");
            return true;
        }
        if self.inner.timer.deadline() > Instant::now() {
            return false;
        }
        info!(
            "[{name}] idle for {}, stopping",
            format_duration(self.inner.config.idle)
        );
        if let Err(e) = run.end_run(name, ManagerState::Stopped) {
            warn!("[{name}] {e}");
        }
        true
    }

    /// Wait for a run that has already been sent SIGTERM, escalating to SIGKILL
    /// when `stop_timeout` is configured.
    async fn reap_stopped(&self, handle: &ProcessHandle) -> ExitOutcome {
        let Some(limit) = self.inner.config.stop_timeout else {
            return handle.wait().await;
        };
        match timeout(limit, handle.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "[{}] still running {} after SIGTERM, sending SIGKILL",
                    self.name(),
                    format_duration(limit)
                );
                if let Err(e) = handle.signal_group(Signal::SIGKILL) {
                    warn!("[{}] {e}", self.name());
                }
                handle.wait().await
            }
        }
    }

    fn on_exit(&self, generation: u64, handle: &ProcessHandle, outcome: ExitOutcome, stopped: bool) {
        let name = self.name();
        {
            let mut run = self.inner.write();
            run.last_exit = Some(outcome.clone());
            if run.is_current(generation, ManagerState::Running) {
                run.token.cancel();
                run.active = None;
                run.transition(name, ManagerState::Stopped);
            }
        }

        if stopped {
            info!("[{name}] pid {} gone after stop ({outcome})", handle.pid());
            return;
        }
        match outcome.check() {
            Ok(()) => info!("[{name}] exited with {outcome}"),
            Err(e) => warn!("[{name}] {e}"),
        }
    }

    #[cfg(test)]
    fn set_spawn_hook(&self, hook: impl FnOnce(u32) + Send + 'static) {
        *self
            .inner
            .spawn_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    #[cfg(test)]
    fn run_spawn_hook(&self, spawned: &Result<ProcessHandle, SpawnError>) {
        let hook = self
            .inner
            .spawn_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(hook), Ok(handle)) = (hook, spawned) {
            hook(handle.pid());
        }
    }
}
