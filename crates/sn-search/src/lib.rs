//! # sn-search
//!
//! Built-in search strategies for SweepNet: a typed search space plus
//! random and grid proposers implementing the [`sn_types::Proposer`] seam.
//! The coordination core treats these exactly like any user-supplied
//! strategy.

mod proposers;
mod space;

pub use proposers::{BestObservation, GridProposer, ObjectiveDirection, RandomProposer};
pub use space::{Dimension, DimensionKind, SearchSpace};
