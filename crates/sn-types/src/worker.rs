//! Worker identity and lifecycle states.

use serde::{Deserialize, Serialize};

/// Identifies a remote machine that can evaluate candidates.  The address
/// is the unique key (it is also what the launch command template receives
/// as the remote target); the category selects the launch command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub address: String,
    pub category: String,
}

impl WorkerDescriptor {
    pub fn new(address: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            category: category.into(),
        }
    }
}

/// Lifecycle state of a worker.  Owned exclusively by the registry; every
/// transition goes through a registry method so the one-dispatch-per-worker
/// invariant holds under concurrent resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Registered, launch not yet attempted.
    Unlaunched,
    /// Launch command issued, waiting for the worker to connect back.
    Launching,
    /// Connected and ready for a dispatch.
    Idle,
    /// Exactly one dispatch outstanding.
    Busy,
    /// Launch or communication failure; eligible for bounded relaunch.
    Unreachable,
    /// Permanently excluded (explicit shutdown or relaunch budget spent).
    Terminated,
}

impl WorkerState {
    /// Whether the worker could still produce observations in the future
    /// without outside intervention.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unlaunched => "unlaunched",
            Self::Launching => "launching",
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Unreachable => "unreachable",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
