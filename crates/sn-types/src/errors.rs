use thiserror::Error;

use crate::candidate::CandidateId;
use crate::worker::WorkerState;

/// Main error type for the SweepNet system
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Remote process could not be started or kept alive.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("no launch command for machine category: {category}")]
    UnknownCategory { category: String },

    #[error("failed to spawn launch command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("launch command for {worker} exited with {code:?}: {stderr}")]
    Exited {
        worker: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Transport broken on a dispatch channel.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel closed by peer")]
    Closed,

    #[error("channel transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed protocol message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("unexpected message on channel: {message}")]
    UnexpectedMessage { message: String },
}

/// Outcome of waiting for an observation.  A timeout is recoverable and
/// deliberately distinct from a broken channel: it usually means a hung
/// evaluation rather than a dead process.
#[derive(Error, Debug)]
pub enum RecvError {
    #[error("no observation within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Local registry precondition violations.  Surfaced synchronously to the
/// caller, never swallowed.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("worker already registered: {address}")]
    DuplicateWorker { address: String },

    #[error("no worker available and none can become available")]
    NoWorkerAvailable,

    #[error("unknown worker: {address}")]
    UnknownWorker { address: String },

    #[error("invalid transition for {address}: {from} -> {to}")]
    InvalidTransition {
        address: String,
        from: WorkerState,
        to: WorkerState,
    },
}

/// Client-side evaluation failure.  Recoverable failures become failure
/// observations; fatal ones terminate the worker process so the host can
/// detect the closure and mark it unreachable.
#[derive(Error, Debug)]
#[error("evaluation of candidate {candidate_id} failed: {message}")]
pub struct EvalError {
    pub candidate_id: CandidateId,
    pub message: String,
    pub fatal: bool,
}

impl EvalError {
    pub fn recoverable(candidate_id: CandidateId, message: impl Into<String>) -> Self {
        Self {
            candidate_id,
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(candidate_id: CandidateId, message: impl Into<String>) -> Self {
        Self {
            candidate_id,
            message: message.into(),
            fatal: true,
        }
    }
}

/// Result type alias for SweepNet operations
pub type SweepResult<T> = Result<T, SweepError>;
