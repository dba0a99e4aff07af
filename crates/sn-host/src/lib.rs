//! # sn-host
//!
//! Host-side coordination core for SweepNet: the worker registry, the
//! remote launcher, dispatch channels, and the coordinator that drives the
//! optimization loop.  The search strategy and the objective function stay
//! behind the [`sn_types::Proposer`] and [`sn_types::Evaluator`] seams.

mod channel;
mod config;
mod coordinator;
mod launcher;
mod registry;

pub use channel::{ChannelServer, DispatchChannel, WorkerConnection};
pub use config::CoordinatorConfig;
pub use coordinator::{DispatchRecord, HostCoordinator, RunSummary, StopReason};
pub use launcher::{render_template, RemoteLauncher};
pub use registry::{Acquire, RegistryConfig, WorkerRegistry};
