//! Observations: evaluation results tied back to candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::CandidateId;

/// The result payload of an evaluation: either a score vector or a
/// structured failure reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Successful evaluation.  Most objectives report a single value;
    /// multi-objective evaluators report one entry per objective.
    Score { values: Vec<f64> },
    /// The evaluation ran but could not produce a score.
    Failed { reason: String },
}

/// The evaluation result (or failure) for exactly one [`Candidate`]
/// identifier.  Immutable once created.
///
/// [`Candidate`]: crate::Candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub candidate_id: CandidateId,
    pub outcome: Outcome,
    pub completed_at: DateTime<Utc>,
    /// Address of the worker that produced this observation, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl Observation {
    pub fn score(candidate_id: CandidateId, values: Vec<f64>) -> Self {
        Self {
            candidate_id,
            outcome: Outcome::Score { values },
            completed_at: Utc::now(),
            worker: None,
        }
    }

    pub fn scalar(candidate_id: CandidateId, value: f64) -> Self {
        Self::score(candidate_id, vec![value])
    }

    pub fn failed(candidate_id: CandidateId, reason: impl Into<String>) -> Self {
        Self {
            candidate_id,
            outcome: Outcome::Failed {
                reason: reason.into(),
            },
            completed_at: Utc::now(),
            worker: None,
        }
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Score { .. })
    }

    /// First score value, if the evaluation succeeded.
    pub fn primary_score(&self) -> Option<f64> {
        match &self.outcome {
            Outcome::Score { values } => values.first().copied(),
            Outcome::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_is_tagged_on_the_wire() {
        let obs = Observation::scalar(3, 0.92);
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["outcome"]["kind"], "score");
        assert_eq!(json["outcome"]["values"][0], 0.92);

        let obs = Observation::failed(4, "cuda out of memory");
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["outcome"]["kind"], "failed");
        assert_eq!(json["outcome"]["reason"], "cuda out of memory");
    }

    #[test]
    fn primary_score_only_on_success() {
        assert_eq!(Observation::scalar(1, 1.5).primary_score(), Some(1.5));
        assert_eq!(Observation::failed(1, "boom").primary_score(), None);
    }

    #[test]
    fn worker_attribution() {
        let obs = Observation::scalar(9, 0.1).with_worker("gpu1.local");
        assert_eq!(obs.worker.as_deref(), Some("gpu1.local"));
        assert!(obs.is_success());
    }
}
