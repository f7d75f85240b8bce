// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration could not be turned into a set of managers. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("malformed configuration: {} declares no managers", path.display())]
    NoManagers { path: PathBuf },
    #[error("malformed configuration: manager #{index} has an empty command")]
    EmptyCommand { index: usize },
    #[error("malformed configuration: route {route} is used by more than one manager")]
    DuplicateRoute { route: String },
}

/// The child process could not be created.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("failed to spawn {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
    #[error("{program} was spawned but reported no pid")]
    NoPid { program: String },
}

/// A signal could not be delivered to a process group.
#[derive(Error, Debug)]
#[error("failed to send {signal} to process group {pgid}: {source}")]
pub struct SignalError {
    pub pgid: i32,
    pub signal: Signal,
    pub source: Errno,
}

/// A child ended abnormally. Reported by the exit watcher, never returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessExitError {
    #[error("exited with code {0}")]
    NonZero(i32),
    #[error("killed by signal {0}")]
    Signaled(String),
    #[error("exit status unavailable: {0}")]
    Unknown(String),
}
