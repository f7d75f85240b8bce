// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// No child process. The next activation spawns one.
    Stopped,
    /// One caller has claimed the spawn and is creating the child.
    Starting,
    /// Child process is alive and the idle timer is armed.
    Running,
    /// Shut down for good; activations are ignored.
    Terminated,
}

impl ManagerState {
    pub fn is_live(self) -> bool {
        matches!(self, ManagerState::Starting | ManagerState::Running)
    }

    pub(crate) fn can_transition_to(self, next: ManagerState) -> bool {
        use ManagerState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Stopped)
                | (Stopped, Terminated)
                | (Starting, Terminated)
                | (Running, Terminated)
                | (Terminated, Terminated)
        )
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Stopped => write!(f, "stopped"),
            ManagerState::Starting => write!(f, "starting"),
            ManagerState::Running => write!(f, "running"),
            ManagerState::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ManagerState::*;

    const ALL: [ManagerState; 4] = [Stopped, Starting, Running, Terminated];

    #[test]
    fn test_run_loop_transitions() {
        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopped));
        assert!(Starting.can_transition_to(Stopped));
    }

    #[test]
    fn test_no_shortcut_into_running() {
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn test_terminated_reachable_from_everywhere() {
        for state in ALL {
            assert!(state.can_transition_to(Terminated), "{state} -> terminated");
        }
    }

    #[test]
    fn test_terminated_is_absorbing() {
        for next in [Stopped, Starting, Running] {
            assert!(!Terminated.can_transition_to(next), "terminated -> {next}");
        }
    }

    #[test]
    fn test_is_live() {
        assert!(Starting.is_live());
        assert!(Running.is_live());
        assert!(!Stopped.is_live());
        assert!(!Terminated.is_live());
    }

    #[test]
    fn test_display() {
        let names: Vec<String> = ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["stopped", "starting", "running", "terminated"]);
    }
}
