//! Worker registry: the single source of truth for worker availability.
//!
//! Every lifecycle transition goes through a method here, under one lock,
//! so the "at most one outstanding dispatch per worker" invariant holds no
//! matter how many dispatch tasks resolve concurrently.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use sn_types::{RegistryError, WorkerDescriptor, WorkerState};
use tracing::{debug, info, warn};

/// Tunables for failure handling and relaunch backoff.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Consecutive dispatch failures before a worker is marked unreachable.
    pub max_worker_failures: u32,
    /// Times a worker may be marked unreachable before permanent exclusion.
    pub max_relaunch_attempts: u32,
    /// Base delay before retrying an unreachable worker; doubled per attempt.
    pub relaunch_backoff: Duration,
    /// Upper bound on the backoff delay.
    pub relaunch_backoff_cap: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_worker_failures: 2,
            max_relaunch_attempts: 3,
            relaunch_backoff: Duration::from_secs(2),
            relaunch_backoff_cap: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct WorkerEntry {
    descriptor: WorkerDescriptor,
    state: WorkerState,
    idle_since: Option<Instant>,
    launching_since: Option<Instant>,
    /// Consecutive dispatch failures since the last success.
    failures: u32,
    /// Times this worker has gone unreachable.
    unreachable_count: u32,
    /// When an unreachable worker becomes eligible for relaunch.
    next_retry_at: Option<Instant>,
}

impl WorkerEntry {
    fn new(descriptor: WorkerDescriptor) -> Self {
        Self {
            descriptor,
            state: WorkerState::Unlaunched,
            idle_since: None,
            launching_since: None,
            failures: 0,
            unreachable_count: 0,
            next_retry_at: None,
        }
    }
}

/// Result of [`WorkerRegistry::acquire_idle`].
#[derive(Debug, Clone, PartialEq)]
pub enum Acquire {
    /// A worker was acquired and transitioned to BUSY.
    Ready(WorkerDescriptor),
    /// Nothing idle right now, but at least one worker can plausibly
    /// become available (launching, busy, unlaunched, or awaiting retry).
    NoneIdle,
    /// Nothing idle and nothing can become available: the
    /// NoWorkerAvailable condition.
    Exhausted,
}

/// Tracks which workers are running, idle, busy, or unreachable.
pub struct WorkerRegistry {
    config: RegistryConfig,
    workers: Mutex<HashMap<String, WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Add a worker in state UNLAUNCHED.  Callable at any point in the run;
    /// the coordinator picks new workers up on its next maintenance pass.
    pub fn register(&self, descriptor: WorkerDescriptor) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock();
        if workers.contains_key(&descriptor.address) {
            return Err(RegistryError::DuplicateWorker {
                address: descriptor.address.clone(),
            });
        }
        info!(worker = %descriptor.address, category = %descriptor.category, "worker registered");
        workers.insert(descriptor.address.clone(), WorkerEntry::new(descriptor));
        Ok(())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.workers.lock().contains_key(address)
    }

    pub fn state(&self, address: &str) -> Option<WorkerState> {
        self.workers.lock().get(address).map(|e| e.state)
    }

    /// Acquire one IDLE worker, longest-idle-first, transitioning it to
    /// BUSY.  Workers in `avoid` (those a retrying candidate already
    /// failed on) are passed over while any other worker could still
    /// become available; once every worker has failed the candidate, an
    /// avoided idle one is reused rather than stalling the queue.  See
    /// [`Acquire`] for the no-worker cases.
    pub fn acquire_idle(&self, avoid: &HashSet<String>) -> Acquire {
        let mut workers = self.workers.lock();

        let chosen = workers
            .values_mut()
            .filter(|e| {
                e.state == WorkerState::Idle && !avoid.contains(&e.descriptor.address)
            })
            .min_by_key(|e| e.idle_since.unwrap_or_else(Instant::now));
        if let Some(entry) = chosen {
            entry.state = WorkerState::Busy;
            entry.idle_since = None;
            return Acquire::Ready(entry.descriptor.clone());
        }

        let untried_pending = workers.values().any(|e| {
            e.state != WorkerState::Terminated && !avoid.contains(&e.descriptor.address)
        });
        if untried_pending {
            return Acquire::NoneIdle;
        }

        let chosen = workers
            .values_mut()
            .filter(|e| e.state == WorkerState::Idle)
            .min_by_key(|e| e.idle_since.unwrap_or_else(Instant::now));
        if let Some(entry) = chosen {
            entry.state = WorkerState::Busy;
            entry.idle_since = None;
            return Acquire::Ready(entry.descriptor.clone());
        }

        let plausible = workers
            .values()
            .any(|e| e.state != WorkerState::Terminated);
        if plausible {
            Acquire::NoneIdle
        } else {
            Acquire::Exhausted
        }
    }

    /// Resolve a dispatch.  Success resets the failure counter and returns
    /// the worker to IDLE; failure counts toward the unreachable threshold.
    /// Idempotent against workers already in a terminal state.  Returns the
    /// resulting state.
    pub fn release(&self, address: &str, success: bool) -> Result<WorkerState, RegistryError> {
        let mut workers = self.workers.lock();
        let entry = workers
            .get_mut(address)
            .ok_or_else(|| RegistryError::UnknownWorker {
                address: address.to_string(),
            })?;

        match entry.state {
            WorkerState::Busy => {}
            // Already resolved by another path (e.g. marked unreachable on
            // channel closure before the dispatch task reported back).
            _ => return Ok(entry.state),
        }

        if success {
            entry.failures = 0;
            entry.state = WorkerState::Idle;
            entry.idle_since = Some(Instant::now());
        } else {
            entry.failures += 1;
            if entry.failures >= self.config.max_worker_failures {
                Self::go_unreachable(entry, &self.config);
            } else {
                entry.state = WorkerState::Idle;
                entry.idle_since = Some(Instant::now());
            }
        }
        Ok(entry.state)
    }

    /// Record that a launch command has been issued.
    pub fn mark_launching(&self, address: &str) -> Result<(), RegistryError> {
        self.transition(address, WorkerState::Launching, |state| {
            matches!(
                state,
                WorkerState::Unlaunched | WorkerState::Unreachable | WorkerState::Launching
            )
        })
    }

    /// Record that the worker connected and is ready for dispatches.
    pub fn mark_live(&self, address: &str) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock();
        let entry = workers
            .get_mut(address)
            .ok_or_else(|| RegistryError::UnknownWorker {
                address: address.to_string(),
            })?;

        match entry.state {
            WorkerState::Unlaunched
            | WorkerState::Launching
            | WorkerState::Unreachable
            | WorkerState::Idle => {
                entry.state = WorkerState::Idle;
                entry.idle_since = Some(Instant::now());
                entry.launching_since = None;
                entry.failures = 0;
                entry.unreachable_count = 0;
                entry.next_retry_at = None;
                Ok(())
            }
            from => Err(RegistryError::InvalidTransition {
                address: address.to_string(),
                from,
                to: WorkerState::Idle,
            }),
        }
    }

    /// Record a launch or communication failure.  Applies backoff and, past
    /// the relaunch budget, permanent exclusion.  Returns the resulting
    /// state.  Idempotent against terminal states.
    pub fn mark_unreachable(&self, address: &str) -> Result<WorkerState, RegistryError> {
        let mut workers = self.workers.lock();
        let entry = workers
            .get_mut(address)
            .ok_or_else(|| RegistryError::UnknownWorker {
                address: address.to_string(),
            })?;

        if entry.state == WorkerState::Terminated {
            return Ok(entry.state);
        }
        Self::go_unreachable(entry, &self.config);
        Ok(entry.state)
    }

    /// Permanently exclude a worker.
    pub fn mark_terminated(&self, address: &str) -> Result<(), RegistryError> {
        let mut workers = self.workers.lock();
        let entry = workers
            .get_mut(address)
            .ok_or_else(|| RegistryError::UnknownWorker {
                address: address.to_string(),
            })?;
        entry.state = WorkerState::Terminated;
        entry.idle_since = None;
        entry.launching_since = None;
        Ok(())
    }

    /// Shut everything down.
    pub fn terminate_all(&self) {
        let mut workers = self.workers.lock();
        for entry in workers.values_mut() {
            entry.state = WorkerState::Terminated;
            entry.idle_since = None;
            entry.launching_since = None;
        }
    }

    /// Workers whose launch should be (re)attempted now: UNLAUNCHED ones,
    /// and UNREACHABLE ones whose backoff deadline has passed.
    pub fn due_for_launch(&self, now: Instant) -> Vec<WorkerDescriptor> {
        let workers = self.workers.lock();
        workers
            .values()
            .filter(|e| match e.state {
                WorkerState::Unlaunched => true,
                WorkerState::Unreachable => {
                    e.next_retry_at.map(|at| at <= now).unwrap_or(true)
                }
                _ => false,
            })
            .map(|e| e.descriptor.clone())
            .collect()
    }

    /// Workers stuck in LAUNCHING longer than `timeout` without connecting.
    pub fn stale_launches(&self, now: Instant, timeout: Duration) -> Vec<String> {
        let workers = self.workers.lock();
        workers
            .values()
            .filter(|e| {
                e.state == WorkerState::Launching
                    && e.launching_since
                        .map(|since| now.duration_since(since) > timeout)
                        .unwrap_or(false)
            })
            .map(|e| e.descriptor.address.clone())
            .collect()
    }

    /// Number of workers currently able to take or hold a dispatch.
    pub fn live_count(&self) -> usize {
        let workers = self.workers.lock();
        workers.values().filter(|e| e.state.is_live()).count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// True when workers were registered but every one of them has been
    /// permanently excluded.
    pub fn all_terminated(&self) -> bool {
        let workers = self.workers.lock();
        !workers.is_empty()
            && workers
                .values()
                .all(|e| e.state == WorkerState::Terminated)
    }

    fn transition<F>(&self, address: &str, to: WorkerState, allowed: F) -> Result<(), RegistryError>
    where
        F: FnOnce(WorkerState) -> bool,
    {
        let mut workers = self.workers.lock();
        let entry = workers
            .get_mut(address)
            .ok_or_else(|| RegistryError::UnknownWorker {
                address: address.to_string(),
            })?;

        if !allowed(entry.state) {
            return Err(RegistryError::InvalidTransition {
                address: address.to_string(),
                from: entry.state,
                to,
            });
        }
        debug!(worker = %address, from = %entry.state, to = %to, "worker transition");
        entry.state = to;
        if to == WorkerState::Launching {
            entry.launching_since = Some(Instant::now());
        }
        Ok(())
    }

    fn go_unreachable(entry: &mut WorkerEntry, config: &RegistryConfig) {
        entry.unreachable_count += 1;
        entry.idle_since = None;
        entry.launching_since = None;
        entry.failures = 0;

        if entry.unreachable_count > config.max_relaunch_attempts {
            warn!(worker = %entry.descriptor.address, "relaunch budget spent, excluding worker");
            entry.state = WorkerState::Terminated;
            entry.next_retry_at = None;
            return;
        }

        let backoff = config
            .relaunch_backoff
            .saturating_mul(1 << (entry.unreachable_count - 1).min(16))
            .min(config.relaunch_backoff_cap);
        warn!(
            worker = %entry.descriptor.address,
            attempt = entry.unreachable_count,
            backoff_ms = backoff.as_millis() as u64,
            "worker unreachable, retry scheduled"
        );
        entry.state = WorkerState::Unreachable;
        entry.next_retry_at = Some(Instant::now() + backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(RegistryConfig::default())
    }

    fn gpu(n: usize) -> WorkerDescriptor {
        WorkerDescriptor::new(format!("gpu{n}.local"), "gpu-box")
    }

    fn anyone() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn duplicate_registration_rejected() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        let err = reg.register(gpu(1)).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateWorker { .. }));
    }

    #[test]
    fn acquire_prefers_longest_idle() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.register(gpu(2)).unwrap();

        reg.mark_live("gpu1.local").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        reg.mark_live("gpu2.local").unwrap();

        match reg.acquire_idle(&anyone()) {
            Acquire::Ready(desc) => assert_eq!(desc.address, "gpu1.local"),
            other => panic!("expected gpu1, got {other:?}"),
        }
        match reg.acquire_idle(&anyone()) {
            Acquire::Ready(desc) => assert_eq!(desc.address, "gpu2.local"),
            other => panic!("expected gpu2, got {other:?}"),
        }
        assert_eq!(reg.acquire_idle(&anyone()), Acquire::NoneIdle);
    }

    #[test]
    fn exhausted_only_when_nothing_can_recover() {
        let reg = registry();
        assert_eq!(reg.acquire_idle(&anyone()), Acquire::Exhausted);

        reg.register(gpu(1)).unwrap();
        assert_eq!(reg.acquire_idle(&anyone()), Acquire::NoneIdle); // unlaunched can still launch

        reg.mark_terminated("gpu1.local").unwrap();
        assert_eq!(reg.acquire_idle(&anyone()), Acquire::Exhausted);
    }

    #[test]
    fn release_success_returns_to_idle() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.mark_live("gpu1.local").unwrap();

        assert!(matches!(reg.acquire_idle(&anyone()), Acquire::Ready(_)));
        assert_eq!(reg.state("gpu1.local"), Some(WorkerState::Busy));

        let state = reg.release("gpu1.local", true).unwrap();
        assert_eq!(state, WorkerState::Idle);
    }

    #[test]
    fn repeated_failures_reach_unreachable() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.mark_live("gpu1.local").unwrap();

        assert!(matches!(reg.acquire_idle(&anyone()), Acquire::Ready(_)));
        assert_eq!(reg.release("gpu1.local", false).unwrap(), WorkerState::Idle);

        assert!(matches!(reg.acquire_idle(&anyone()), Acquire::Ready(_)));
        assert_eq!(
            reg.release("gpu1.local", false).unwrap(),
            WorkerState::Unreachable
        );
    }

    #[test]
    fn success_resets_failure_count() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.mark_live("gpu1.local").unwrap();

        for _ in 0..3 {
            assert!(matches!(reg.acquire_idle(&anyone()), Acquire::Ready(_)));
            assert_eq!(reg.release("gpu1.local", false).unwrap(), WorkerState::Idle);
            assert!(matches!(reg.acquire_idle(&anyone()), Acquire::Ready(_)));
            assert_eq!(reg.release("gpu1.local", true).unwrap(), WorkerState::Idle);
        }
    }

    #[test]
    fn acquire_passes_over_workers_a_candidate_failed_on() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.register(gpu(2)).unwrap();
        reg.mark_live("gpu1.local").unwrap();
        reg.mark_live("gpu2.local").unwrap();

        let avoid: HashSet<String> = ["gpu1.local".to_string()].into();
        match reg.acquire_idle(&avoid) {
            Acquire::Ready(desc) => assert_eq!(desc.address, "gpu2.local"),
            other => panic!("expected gpu2, got {other:?}"),
        }

        // gpu2 is now busy; gpu1 is idle but already failed this
        // candidate, so the retry waits for gpu2 instead.
        assert_eq!(reg.acquire_idle(&avoid), Acquire::NoneIdle);

        // Once every worker has failed the candidate, an avoided idle
        // worker is reused rather than stalling the queue.
        reg.release("gpu2.local", true).unwrap();
        let both: HashSet<String> =
            ["gpu1.local".to_string(), "gpu2.local".to_string()].into();
        assert!(matches!(reg.acquire_idle(&both), Acquire::Ready(_)));
    }

    #[test]
    fn release_idempotent_on_terminal_state() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.mark_terminated("gpu1.local").unwrap();
        assert_eq!(
            reg.release("gpu1.local", true).unwrap(),
            WorkerState::Terminated
        );
    }

    #[test]
    fn unreachable_workers_get_bounded_retries() {
        let config = RegistryConfig {
            relaunch_backoff: Duration::from_millis(0),
            max_relaunch_attempts: 2,
            ..Default::default()
        };
        let reg = WorkerRegistry::new(config);
        reg.register(gpu(1)).unwrap();

        for _ in 0..2 {
            reg.mark_unreachable("gpu1.local").unwrap();
            assert_eq!(reg.state("gpu1.local"), Some(WorkerState::Unreachable));
            let due = reg.due_for_launch(Instant::now());
            assert_eq!(due.len(), 1, "zero backoff should be immediately due");
            reg.mark_launching("gpu1.local").unwrap();
            reg.mark_live("gpu1.local").unwrap();
        }

        // mark_live resets the budget; drain it without recovery
        reg.mark_unreachable("gpu1.local").unwrap();
        reg.mark_unreachable("gpu1.local").unwrap();
        let state = reg.mark_unreachable("gpu1.local").unwrap();
        assert_eq!(state, WorkerState::Terminated);
        assert!(reg.due_for_launch(Instant::now()).is_empty());
    }

    #[test]
    fn backoff_defers_relaunch() {
        let config = RegistryConfig {
            relaunch_backoff: Duration::from_secs(60),
            ..Default::default()
        };
        let reg = WorkerRegistry::new(config);
        reg.register(gpu(1)).unwrap();
        reg.mark_unreachable("gpu1.local").unwrap();
        assert!(reg.due_for_launch(Instant::now()).is_empty());
    }

    #[test]
    fn stale_launch_detection() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.mark_launching("gpu1.local").unwrap();

        assert!(reg
            .stale_launches(Instant::now(), Duration::from_secs(30))
            .is_empty());
        let later = Instant::now() + Duration::from_secs(60);
        assert_eq!(
            reg.stale_launches(later, Duration::from_secs(30)),
            vec!["gpu1.local".to_string()]
        );
    }

    #[test]
    fn mark_live_rejects_busy_worker() {
        let reg = registry();
        reg.register(gpu(1)).unwrap();
        reg.mark_live("gpu1.local").unwrap();
        assert!(matches!(reg.acquire_idle(&anyone()), Acquire::Ready(_)));

        let err = reg.mark_live("gpu1.local").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }
}
