//! The host coordinator: drives the optimization loop.
//!
//! One event loop owns all mutable run state.  Each in-flight dispatch runs
//! on its own task (a hung worker never blocks the others) and reports back
//! over an mpsc channel, so observations reach the proposer in completion
//! order.  Worker launches happen on a periodic maintenance pass.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sn_types::{
    Candidate, CandidateId, ChannelError, Observation, Proposer, RecvError, RegistryError,
    SweepError, SweepResult, WorkerDescriptor, WorkerState,
};

use crate::channel::{ChannelServer, DispatchChannel, WorkerConnection};
use crate::config::CoordinatorConfig;
use crate::launcher::RemoteLauncher;
use crate::registry::{Acquire, WorkerRegistry};

/// One outstanding dispatch: which candidate went to which worker, when,
/// and on which attempt.  Created at send, destroyed on resolution; its
/// existence is what makes an incoming observation applicable.
#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub candidate_id: CandidateId,
    pub worker: String,
    pub issued_at: DateTime<Utc>,
    pub attempt: u32,
}

/// How a single dispatch attempt ended.
#[derive(Debug)]
enum DispatchOutcome {
    Delivered(Observation),
    TimedOut { timeout_ms: u64 },
    Failed(ChannelError),
}

struct DispatchResolved {
    worker: String,
    candidate_id: CandidateId,
    outcome: DispatchOutcome,
}

/// Retry bookkeeping for a candidate with at least one failed attempt.
/// The workers it failed on are skipped on re-dispatch while any other
/// worker could still take it.
#[derive(Debug, Default)]
struct RetryState {
    attempts: u32,
    failed_on: HashSet<String>,
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The proposer reported convergence or its own budget.
    ProposerStop,
    /// The coordinator's observation cap was reached.
    ObservationBudget,
    /// The wall-clock budget expired.
    TimeBudget,
}

/// Final accounting for one optimization run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub stop_reason: StopReason,
    /// Candidates resolved with a successful score.
    pub completed: usize,
    /// Candidates resolved with a failure observation (evaluation failures,
    /// retry exhaustion, or termination while unresolved).
    pub failed: usize,
    /// Dispatch attempts that were retried on another worker.
    pub retries: usize,
    pub elapsed: Duration,
}

/// Drives candidates from the proposer to workers and observations back.
pub struct HostCoordinator<P: Proposer> {
    config: CoordinatorConfig,
    run_id: Uuid,
    proposer: P,
    registry: Arc<WorkerRegistry>,
    launcher: Arc<RemoteLauncher>,
    server: Option<ChannelServer>,
    local_addr: SocketAddr,
    channels: HashMap<String, Arc<DispatchChannel>>,
    candidates: HashMap<CandidateId, Candidate>,
    pending: VecDeque<CandidateId>,
    outstanding: HashMap<CandidateId, DispatchRecord>,
    retry: HashMap<CandidateId, RetryState>,
    next_candidate_id: CandidateId,
    completed: usize,
    failed: usize,
    retries: usize,
    resolved_tx: mpsc::Sender<DispatchResolved>,
    resolved_rx: Option<mpsc::Receiver<DispatchResolved>>,
}

impl<P: Proposer> HostCoordinator<P> {
    /// Bind the dispatch server and prepare a run.  Workers can be
    /// registered through [`Self::registry`] before and during the run.
    pub async fn bind(config: CoordinatorConfig, proposer: P) -> SweepResult<Self> {
        let server = ChannelServer::bind(&config.listen).await?;
        let local_addr = server.local_addr()?;
        let advertise = config
            .advertise
            .clone()
            .unwrap_or_else(|| local_addr.to_string());
        let launcher = Arc::new(RemoteLauncher::new(config.categories.clone(), advertise));
        let registry = Arc::new(WorkerRegistry::new(config.registry.clone()));
        let (resolved_tx, resolved_rx) = mpsc::channel(256);

        Ok(Self {
            config,
            run_id: Uuid::new_v4(),
            proposer,
            registry,
            launcher,
            server: Some(server),
            local_addr,
            channels: HashMap::new(),
            candidates: HashMap::new(),
            pending: VecDeque::new(),
            outstanding: HashMap::new(),
            retry: HashMap::new(),
            next_candidate_id: 1,
            completed: 0,
            failed: 0,
            retries: 0,
            resolved_tx,
            resolved_rx: Some(resolved_rx),
        })
    }

    /// Actual bound address of the dispatch server (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared registry handle, for pre-registering workers and for adding
    /// machines mid-run.
    pub fn registry(&self) -> Arc<WorkerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the optimization loop to completion.
    pub async fn run(mut self) -> SweepResult<RunSummary> {
        let started = Instant::now();
        let (server, mut resolved_rx) = match (self.server.take(), self.resolved_rx.take()) {
            (Some(server), Some(rx)) => (server, rx),
            _ => return Err(SweepError::Internal("coordinator already consumed".into())),
        };

        let (conn_tx, mut conn_rx) = mpsc::channel::<WorkerConnection>(16);
        let accept_task = tokio::spawn(server.run(conn_tx));
        let mut maintenance = tokio::time::interval(self.config.maintenance_interval);
        maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(run = %self.run_id, addr = %self.local_addr, "optimization run started");

        let mut stop: Option<StopReason> = None;
        let mut drain_deadline: Option<Instant> = None;

        let outcome: SweepResult<StopReason> = loop {
            if stop.is_none() {
                stop = self.stop_reason(started);
                if let Some(reason) = stop {
                    info!(
                        run = %self.run_id,
                        reason = ?reason,
                        outstanding = self.outstanding.len(),
                        workers_live = self.registry.live_count(),
                        "stopping, draining in-flight dispatches"
                    );
                    drain_deadline = Some(Instant::now() + self.config.drain_timeout);
                }
            }

            match (stop, drain_deadline) {
                (Some(reason), Some(deadline)) => {
                    if self.outstanding.is_empty() {
                        break Ok(reason);
                    }
                    if Instant::now() >= deadline {
                        warn!(
                            outstanding = self.outstanding.len(),
                            "drain deadline reached with dispatches still in flight"
                        );
                        break Ok(reason);
                    }
                }
                _ => {
                    self.pump();
                    if !self.pending.is_empty()
                        && self.outstanding.is_empty()
                        && self.registry.all_terminated()
                    {
                        break Err(RegistryError::NoWorkerAvailable.into());
                    }
                }
            }

            tokio::select! {
                maybe_conn = conn_rx.recv() => match maybe_conn {
                    Some(connection) => self.on_worker_connected(connection),
                    None => break Err(SweepError::Internal("dispatch server stopped".into())),
                },
                maybe_resolved = resolved_rx.recv() => {
                    if let Some(resolved) = maybe_resolved {
                        self.on_dispatch_resolved(resolved);
                    }
                },
                _ = maintenance.tick() => self.maintain().await,
            }
        };

        accept_task.abort();
        self.shutdown().await;
        let stop_reason = outcome?;

        let summary = RunSummary {
            run_id: self.run_id,
            stop_reason,
            completed: self.completed,
            failed: self.failed,
            retries: self.retries,
            elapsed: started.elapsed(),
        };
        info!(
            run = %self.run_id,
            completed = summary.completed,
            failed = summary.failed,
            retries = summary.retries,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "optimization run finished"
        );
        Ok(summary)
    }

    /// Top up the pending queue from the proposer and dispatch onto idle
    /// workers.
    fn pump(&mut self) {
        if self.pending.is_empty() {
            for params in self.proposer.propose(self.config.batch_size) {
                let id = self.next_candidate_id;
                self.next_candidate_id += 1;
                debug!(candidate = id, "candidate queued");
                self.candidates.insert(id, Candidate::new(id, params));
                self.pending.push_back(id);
            }
        }

        while let Some(&candidate_id) = self.pending.front() {
            let acquired = {
                let none = HashSet::new();
                let avoid = self
                    .retry
                    .get(&candidate_id)
                    .map(|r| &r.failed_on)
                    .unwrap_or(&none);
                self.registry.acquire_idle(avoid)
            };
            match acquired {
                Acquire::Ready(descriptor) => {
                    self.pending.pop_front();
                    self.dispatch(candidate_id, descriptor);
                }
                Acquire::NoneIdle | Acquire::Exhausted => break,
            }
        }
    }

    fn dispatch(&mut self, candidate_id: CandidateId, descriptor: WorkerDescriptor) {
        let Some(candidate) = self.candidates.get(&candidate_id).cloned() else {
            warn!(candidate = candidate_id, "dispatch of unknown candidate skipped");
            let _ = self.registry.release(&descriptor.address, true);
            return;
        };
        let Some(channel) = self.channels.get(&descriptor.address).cloned() else {
            // Idle without a live channel: the connection raced away.
            warn!(worker = %descriptor.address, "idle worker has no channel");
            let _ = self.registry.mark_unreachable(&descriptor.address);
            self.pending.push_front(candidate_id);
            return;
        };

        let attempt = self.retry.get(&candidate_id).map(|r| r.attempts).unwrap_or(0) + 1;
        debug!(
            candidate = candidate_id,
            worker = %descriptor.address,
            attempt,
            "dispatching candidate"
        );
        self.outstanding.insert(
            candidate_id,
            DispatchRecord {
                candidate_id,
                worker: descriptor.address.clone(),
                issued_at: Utc::now(),
                attempt,
            },
        );

        let tx = self.resolved_tx.clone();
        let timeout = self.config.dispatch_timeout;
        let worker = descriptor.address;
        tokio::spawn(async move {
            let outcome = match channel.send(&candidate).await {
                Err(e) => DispatchOutcome::Failed(e),
                Ok(()) => match channel.receive(candidate.id, timeout).await {
                    Ok(observation) => DispatchOutcome::Delivered(observation),
                    Err(RecvError::Timeout { timeout_ms }) => DispatchOutcome::TimedOut { timeout_ms },
                    Err(RecvError::Channel(e)) => DispatchOutcome::Failed(e),
                },
            };
            let _ = tx
                .send(DispatchResolved {
                    worker,
                    candidate_id: candidate.id,
                    outcome,
                })
                .await;
        });
    }

    fn on_worker_connected(&mut self, connection: WorkerConnection) {
        let address = connection.descriptor.address.clone();
        if !self.registry.contains(&address) {
            info!(worker = %address, "unregistered worker connected, adding at runtime");
            if let Err(e) = self.registry.register(connection.descriptor.clone()) {
                warn!(worker = %address, error = %e, "runtime registration failed");
            }
        }
        match self.registry.mark_live(&address) {
            Ok(()) => {
                self.channels.insert(address, connection.channel);
            }
            // Usually a reconnect racing an outstanding dispatch; keep the
            // old channel, the failure path will sort the worker out.
            Err(e) => warn!(worker = %address, error = %e, "connection rejected"),
        }
    }

    fn on_dispatch_resolved(&mut self, resolved: DispatchResolved) {
        let DispatchResolved {
            worker,
            candidate_id,
            outcome,
        } = resolved;

        let Some(record) = self.outstanding.remove(&candidate_id) else {
            warn!(
                candidate = candidate_id,
                worker = %worker,
                "resolution without a dispatch record discarded"
            );
            return;
        };

        match outcome {
            DispatchOutcome::Delivered(observation) => {
                if let Err(e) = self.registry.release(&worker, true) {
                    warn!(worker = %worker, error = %e, "release failed");
                }
                self.apply_observation(candidate_id, observation.with_worker(worker.as_str()));
            }
            DispatchOutcome::TimedOut { timeout_ms } => {
                warn!(
                    candidate = candidate_id,
                    worker = %worker,
                    timeout_ms,
                    "dispatch timed out, evaluation may be hung"
                );
                self.fail_dispatch(candidate_id, record, &worker, false);
            }
            DispatchOutcome::Failed(e) => {
                warn!(candidate = candidate_id, worker = %worker, error = %e, "dispatch failed");
                let closed = matches!(e, ChannelError::Closed);
                self.fail_dispatch(candidate_id, record, &worker, closed);
            }
        }
    }

    /// Feed a resolved candidate to the proposer, exactly once.
    fn apply_observation(&mut self, candidate_id: CandidateId, observation: Observation) {
        let Some(candidate) = self.candidates.remove(&candidate_id) else {
            warn!(candidate = candidate_id, "duplicate observation discarded");
            return;
        };
        self.retry.remove(&candidate_id);
        if observation.is_success() {
            self.completed += 1;
        } else {
            self.failed += 1;
        }
        debug!(
            candidate = candidate_id,
            success = observation.is_success(),
            "observation applied"
        );
        self.proposer.observe(&candidate, &observation);
    }

    fn fail_dispatch(
        &mut self,
        candidate_id: CandidateId,
        record: DispatchRecord,
        worker: &str,
        channel_closed: bool,
    ) {
        if channel_closed {
            self.channels.remove(worker);
            let _ = self.registry.mark_unreachable(worker);
        } else {
            match self.registry.release(worker, false) {
                Ok(WorkerState::Unreachable) | Ok(WorkerState::Terminated) => {
                    self.channels.remove(worker);
                }
                Ok(_) => {}
                Err(e) => warn!(worker = %worker, error = %e, "release failed"),
            }
        }

        let attempts = record.attempt;
        if attempts <= self.config.retry_budget {
            let state = self.retry.entry(candidate_id).or_default();
            state.attempts = attempts;
            state.failed_on.insert(worker.to_string());
            self.retries += 1;
            debug!(
                candidate = candidate_id,
                attempt = attempts,
                "re-queueing candidate for another worker"
            );
            self.pending.push_front(candidate_id);
        } else {
            error!(
                candidate = candidate_id,
                attempts, "retry budget exhausted, reporting permanent failure"
            );
            self.apply_observation(
                candidate_id,
                Observation::failed(
                    candidate_id,
                    format!("dispatch failed after {attempts} attempts"),
                ),
            );
        }
    }

    /// Launch maintenance: reap dead launch processes, time out workers
    /// stuck in LAUNCHING, and (re)launch whatever is due.
    async fn maintain(&mut self) {
        for (address, err) in self.launcher.reap().await {
            if self.registry.state(&address) == Some(WorkerState::Launching) {
                warn!(worker = %address, error = %err, "launch process died before connecting");
                let _ = self.registry.mark_unreachable(&address);
            } else {
                debug!(worker = %address, error = %err, "launch process exited");
            }
        }

        let now = Instant::now();
        for address in self
            .registry
            .stale_launches(now, self.config.launch_timeout)
        {
            warn!(worker = %address, "worker never connected after launch");
            self.launcher.terminate(&address);
            let _ = self.registry.mark_unreachable(&address);
        }

        for descriptor in self.registry.due_for_launch(now) {
            if !self.launcher.knows_category(&descriptor.category) {
                // Externally managed workers connect on their own, but an
                // unreachable one still spends its relaunch budget per
                // elapsed backoff window; otherwise it would sit
                // UNREACHABLE forever and never reach TERMINATED.
                if self.registry.state(&descriptor.address) == Some(WorkerState::Unreachable) {
                    let _ = self.registry.mark_unreachable(&descriptor.address);
                }
                continue;
            }
            if let Err(e) = self.registry.mark_launching(&descriptor.address) {
                warn!(worker = %descriptor.address, error = %e, "mark_launching failed");
                continue;
            }
            match self.launcher.launch(&descriptor) {
                Ok(spawned) => {
                    if spawned {
                        debug!(worker = %descriptor.address, "launch in progress");
                    }
                }
                Err(e) => {
                    warn!(worker = %descriptor.address, error = %e, "launch failed");
                    let _ = self.registry.mark_unreachable(&descriptor.address);
                }
            }
        }
    }

    fn stop_reason(&mut self, started: Instant) -> Option<StopReason> {
        if self.proposer.should_stop() {
            return Some(StopReason::ProposerStop);
        }
        if let Some(max) = self.config.max_observations {
            if self.completed + self.failed >= max {
                return Some(StopReason::ObservationBudget);
            }
        }
        if let Some(budget) = self.config.max_runtime {
            if started.elapsed() >= budget {
                return Some(StopReason::TimeBudget);
            }
        }
        None
    }

    /// Best-effort cleanup: unresolved candidates become failure
    /// observations (nothing is silently dropped), workers are told to
    /// exit, launch processes are killed.
    async fn shutdown(&mut self) {
        let unresolved: Vec<CandidateId> = self
            .outstanding
            .keys()
            .copied()
            .chain(self.pending.iter().copied())
            .collect();
        for candidate_id in unresolved {
            self.apply_observation(
                candidate_id,
                Observation::failed(candidate_id, "run terminated"),
            );
        }
        self.outstanding.clear();
        self.pending.clear();

        for (address, channel) in self.channels.drain() {
            if let Err(e) = channel.send_shutdown().await {
                debug!(worker = %address, error = %e, "shutdown notice failed");
            }
        }
        self.launcher.terminate_all();
        self.registry.terminate_all();
    }
}
