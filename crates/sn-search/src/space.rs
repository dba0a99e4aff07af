//! Search space definitions.

use serde::{Deserialize, Serialize};
use sn_types::{ParamSet, ParamValue, SweepError};

/// A single named dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
}

/// How a dimension is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionKind {
    /// Continuous uniform range [low, high].
    Float { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Int { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

/// The full search space: an ordered list of dimensions.  Serializable so
/// it can be embedded in the host configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub dimensions: Vec<Dimension>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Float { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Int { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Choice { values },
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Reject dimensions that cannot be sampled: inverted bounds, empty
    /// choice lists, non-positive log-uniform bounds.  Config files are
    /// the usual source of these, so callers should validate before
    /// handing the space to a proposer.
    pub fn validate(&self) -> Result<(), SweepError> {
        for dim in &self.dimensions {
            let problem = match &dim.kind {
                DimensionKind::Float { low, high } if low > high => {
                    Some(format!("float bounds inverted ({low} > {high})"))
                }
                DimensionKind::Int { low, high } if low > high => {
                    Some(format!("int bounds inverted ({low} > {high})"))
                }
                DimensionKind::LogUniform { low, .. } if *low <= 0.0 => {
                    Some(format!("log-uniform bounds must be positive (low = {low})"))
                }
                DimensionKind::LogUniform { low, high } if low > high => {
                    Some(format!("log-uniform bounds inverted ({low} > {high})"))
                }
                DimensionKind::Choice { values } if values.is_empty() => {
                    Some("choice dimension has no values".to_string())
                }
                _ => None,
            };
            if let Some(problem) = problem {
                return Err(SweepError::Config(format!(
                    "dimension `{}`: {problem}",
                    dim.name
                )));
            }
        }
        Ok(())
    }

    /// Whether `params` assigns an in-range value to every dimension.
    pub fn contains(&self, params: &ParamSet) -> bool {
        self.dimensions.iter().all(|dim| {
            let Some(value) = params.get(&dim.name) else {
                return false;
            };
            match (&dim.kind, value) {
                (DimensionKind::Float { low, high }, ParamValue::Float(v)) => {
                    *v >= *low && *v <= *high
                }
                (DimensionKind::LogUniform { low, high }, ParamValue::Float(v)) => {
                    *v >= *low && *v <= *high
                }
                (DimensionKind::Int { low, high }, ParamValue::Int(v)) => {
                    *v >= *low && *v <= *high
                }
                (DimensionKind::Choice { values }, ParamValue::Json(v)) => values.contains(v),
                _ => false,
            }
        })
    }

    /// Total number of grid points (returns `None` if any dimension is
    /// continuous and therefore has no natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for dim in &self.dimensions {
            let size = match &dim.kind {
                DimensionKind::Int { low, high } => (high - low + 1) as usize,
                DimensionKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(size)?;
        }
        Some(total)
    }
}
