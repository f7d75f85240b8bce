// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Run a daemon only while it is wanted: start it on activation, keep it alive
//! while activations keep coming, stop its whole process group once idle.

pub mod config;
pub mod error;
pub mod manager;
pub mod process;
pub mod state;
pub mod supervisor;
pub mod timer;
pub mod trigger;

pub use config::{Config, ManagerConfig, StdioPolicy, load_config};
pub use error::{ConfigError, ProcessExitError, SignalError, SpawnError};
pub use manager::{Manager, ManagerStatus};
pub use process::{ExitOutcome, ProcessHandle};
pub use state::ManagerState;
pub use supervisor::Supervisor;
pub use timer::{Expiry, IdleTimer};
