//! # sn-client
//!
//! Worker-side half of SweepNet: connect back to the host, receive
//! candidates over the dispatch channel, evaluate them, report
//! observations.

mod evaluators;
mod runner;

pub use evaluators::{FnEvaluator, ProcessEvaluator};
pub use runner::{ClientConfig, ClientRunner};
