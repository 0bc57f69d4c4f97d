//! # Debounce Scheduler
//!
//! Trailing-edge, last-edit-wins coalescing of query executions.
//!
//! ```text
//!            on_model_changed             timer expires
//!   Idle ───────────────────────▶ Armed ─────────────────▶ Idle  (callback(latest))
//!                                  │  ▲
//!                                  └──┘ on_model_changed (cancel + re-arm)
//!
//!   Armed/Idle ── on_explicit_run ──▶ Idle  (cancel, callback(model) now)
//!   Armed/Idle ── on_teardown ──────▶ Idle  (cancel, no callback)
//! ```
//!
//! # Invariants
//!
//! - At most one timer is pending. Arming always cancels the previous timer
//!   first, inside the same critical section.
//! - A timer fires only if it is still the pending one when it wakes. A timer
//!   that lost the race against a re-arm, run or teardown is a no-op.
//! - The callback receives the latest model known at fire time and is never
//!   invoked while the state lock is held.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fq_core::QueryModel;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Quiet period used by editors unless configured otherwise.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// The host's "execute this query now" capability.
///
/// Invoked from a timer task or synchronously from
/// [`DebounceScheduler::on_explicit_run`]. Implementations must return
/// quickly; hand the model off to another task if execution is slow.
pub trait ExecutionCallback: Send + Sync + 'static {
    fn execute(&self, model: QueryModel);
}

impl<F> ExecutionCallback for F
where
    F: Fn(QueryModel) + Send + Sync + 'static,
{
    fn execute(&self, model: QueryModel) {
        self(model)
    }
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No deferred execution pending.
    Idle,
    /// One deferred execution is ticking toward its fire time.
    Armed,
}

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct DebounceState {
    pending: Option<PendingTimer>,
    latest: Option<QueryModel>,
    generation: u64,
}

impl DebounceState {
    fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Coalesces model changes into deferred executions. One per editor session.
pub struct DebounceScheduler {
    quiet_period: Duration,
    runtime: Handle,
    state: Arc<Mutex<DebounceState>>,
    callback: Arc<dyn ExecutionCallback>,
}

impl DebounceScheduler {
    /// Create a scheduler that spawns its timers on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use
    /// [`DebounceScheduler::with_handle`] there.
    pub fn new(quiet_period: Duration, callback: impl ExecutionCallback) -> Self {
        Self::with_handle(Handle::current(), quiet_period, callback)
    }

    pub fn with_handle(
        runtime: Handle,
        quiet_period: Duration,
        callback: impl ExecutionCallback,
    ) -> Self {
        Self {
            quiet_period,
            runtime,
            state: Arc::new(Mutex::new(DebounceState::default())),
            callback: Arc::new(callback),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet_period
    }

    pub fn state(&self) -> SchedulerState {
        if lock(&self.state).pending.is_some() {
            SchedulerState::Armed
        } else {
            SchedulerState::Idle
        }
    }

    /// Re-arm the quiet-period timer for `model`, cancelling any pending one.
    pub fn on_model_changed(&self, model: QueryModel) {
        let mut state = lock(&self.state);
        let rearmed = state.cancel();
        state.latest = Some(model);
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;

        let shared = Arc::clone(&self.state);
        let callback = Arc::clone(&self.callback);
        let quiet_period = self.quiet_period;
        // The new task cannot observe the state before `pending` is set: it
        // has to take the lock we are holding.
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(quiet_period).await;
            fire(&shared, generation, callback.as_ref());
        });
        state.pending = Some(PendingTimer { generation, handle });

        tracing::debug!(
            generation,
            rearmed,
            quiet_ms = quiet_period.as_millis() as u64,
            "Debounce timer armed"
        );
    }

    /// Cancel any pending timer and execute `model` immediately, on the
    /// caller's thread.
    pub fn on_explicit_run(&self, model: QueryModel) {
        let cancelled = {
            let mut state = lock(&self.state);
            let cancelled = state.cancel();
            state.latest = Some(model.clone());
            state.generation = state.generation.wrapping_add(1);
            cancelled
        };
        tracing::debug!(cancelled, "Explicit run");
        self.callback.execute(model);
    }

    /// Cancel any pending timer without executing.
    pub fn on_teardown(&self) {
        if lock(&self.state).cancel() {
            tracing::debug!("Pending execution dropped on teardown");
        }
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.on_teardown();
    }
}

impl std::fmt::Debug for DebounceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebounceScheduler")
            .field("quiet_period", &self.quiet_period)
            .field("state", &self.state())
            .finish()
    }
}

fn fire(state: &Mutex<DebounceState>, generation: u64, callback: &dyn ExecutionCallback) {
    let model = {
        let mut state = lock(state);
        match &state.pending {
            Some(timer) if timer.generation == generation => {}
            _ => return,
        }
        state.pending = None;
        state.latest.clone()
    };

    if let Some(model) = model {
        tracing::debug!(generation, "Debounce timer fired");
        callback.execute(model);
    }
}

/// Callbacks run outside the lock, so a poisoned lock is still consistent.
fn lock(state: &Mutex<DebounceState>) -> MutexGuard<'_, DebounceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
