//! # Editor Session
//!
//! One query editor: the current model plus the scheduler that decides when
//! it runs. Every accepted edit replaces the model and notifies the
//! scheduler exactly once; a rejected edit changes nothing.

use fq_core::{ModelResult, QueryModel};
use serde_json::Value;

use crate::scheduler::DebounceScheduler;

#[derive(Debug)]
pub struct EditorSession {
    model: QueryModel,
    scheduler: DebounceScheduler,
}

impl EditorSession {
    pub fn new(initial: QueryModel, scheduler: DebounceScheduler) -> Self {
        Self {
            model: initial,
            scheduler,
        }
    }

    pub fn model(&self) -> &QueryModel {
        &self.model
    }

    pub fn scheduler(&self) -> &DebounceScheduler {
        &self.scheduler
    }

    /// Apply a single field edit and schedule a deferred execution.
    pub fn apply_edit(&mut self, field_path: &str, value: &Value) -> ModelResult<&QueryModel> {
        let next = self.model.with_field_changed(field_path, value)?;
        Ok(self.commit(next))
    }

    /// Point the query at another collection and reset the row limit.
    pub fn change_collection(&mut self, collection_path: &str) -> ModelResult<&QueryModel> {
        let next = self
            .model
            .with_field_changed("collectionPath", &Value::from(collection_path))?
            .with_field_changed("limit", &Value::from(0u64))?;
        Ok(self.commit(next))
    }

    /// Swap in a whole model, e.g. when switching editing mode or loading a
    /// saved panel.
    pub fn replace(&mut self, model: QueryModel) -> &QueryModel {
        self.commit(model)
    }

    /// Execute the current model now, dropping any pending deferred run.
    pub fn run(&self) {
        self.scheduler.on_explicit_run(self.model.clone());
    }

    /// End the session's pending work. Dropping the session does the same.
    pub fn teardown(&self) {
        self.scheduler.on_teardown();
    }

    fn commit(&mut self, next: QueryModel) -> &QueryModel {
        self.model = next;
        self.scheduler.on_model_changed(self.model.clone());
        &self.model
    }
}
