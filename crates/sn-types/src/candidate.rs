//! Candidates: proposed hyperparameter assignments awaiting evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique candidate identifier, assigned monotonically by the host
/// coordinator for the lifetime of one optimization run.
pub type CandidateId = u64;

/// A concrete hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    /// Categorical or otherwise structured values.
    Json(serde_json::Value),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl ParamValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }
}

/// An ordered mapping from hyperparameter name to value.  Ordered so that
/// serialized candidates are byte-stable regardless of insertion order.
pub type ParamSet = BTreeMap<String, ParamValue>;

/// One proposed hyperparameter assignment.  Immutable once created; the
/// id is unique within the run and is the correlation key for the matching
/// [`Observation`](crate::Observation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub params: ParamSet,
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    pub fn new(id: CandidateId, params: ParamSet) -> Self {
        Self {
            id,
            params,
            created_at: Utc::now(),
        }
    }

    /// Look up a single parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }
}
