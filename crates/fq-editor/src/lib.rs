//! # fq-editor: Edit-to-Execution Scheduling
//!
//! Turns a stream of query edits into query executions without issuing one
//! request per keystroke:
//!
//! - [`DebounceScheduler`] coalesces a burst of edits into a single trailing
//!   execution after a quiet period, and lets an explicit run fire at once.
//! - [`EditorSession`] owns the current [`fq_core::QueryModel`] and one
//!   scheduler, applying field edits and notifying the scheduler.
//!
//! What "execute" means is up to the host, supplied as an
//! [`ExecutionCallback`].

pub mod scheduler;
pub mod session;

pub use scheduler::{DebounceScheduler, ExecutionCallback, SchedulerState, DEFAULT_QUIET_PERIOD};
pub use session::EditorSession;
