//! # sn-types
//!
//! Shared data model for SweepNet: candidates and observations, worker
//! identity and lifecycle states, the host/client wire protocol, the error
//! taxonomy, and the collaborator traits (search strategy and objective
//! function) that the coordination core treats as black boxes.

pub mod candidate;
pub mod collaborators;
pub mod errors;
pub mod observation;
pub mod wire;
pub mod worker;

pub use candidate::*;
pub use collaborators::*;
pub use errors::*;
pub use observation::*;
pub use wire::*;
pub use worker::*;
