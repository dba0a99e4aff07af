//! Collaborator seams: the search strategy and the objective function.
//!
//! The coordination core never inspects either side.  It asks a [`Proposer`]
//! for parameter sets, ships them to workers, and feeds every resulting
//! observation (success or failure) back exactly once.

use async_trait::async_trait;

use crate::candidate::{Candidate, ParamSet};
use crate::errors::EvalError;
use crate::observation::Observation;

/// The optimization strategy, host side.
///
/// Observations arrive in completion order, not proposal order, keyed by
/// candidate; implementations must tolerate out-of-order updates.  Failed
/// observations are delivered too — the proposer decides whether to treat
/// missing data as a low score, a retry, or noise.
pub trait Proposer: Send {
    /// Produce up to `batch` parameter sets to evaluate next.  Returning
    /// fewer (or none) is allowed when the strategy has nothing to propose
    /// yet; the coordinator will ask again.
    fn propose(&mut self, batch: usize) -> Vec<ParamSet>;

    /// Record the result for a previously proposed candidate.
    fn observe(&mut self, candidate: &Candidate, observation: &Observation);

    /// Whether the run should stop (convergence or internal budget).
    fn should_stop(&self) -> bool;
}

/// The user's objective function, client side.
///
/// Must be safe to re-run for the same candidate: the host re-dispatches
/// after timeouts and transport failures, so re-evaluation is an accepted
/// side effect, not an error.
#[async_trait]
pub trait Evaluator: Send {
    /// Evaluate one candidate and return its score vector.  Recoverable
    /// errors are reported to the host as failure observations; a fatal
    /// error terminates the worker process.
    async fn evaluate(&mut self, candidate: &Candidate) -> Result<Vec<f64>, EvalError>;
}
