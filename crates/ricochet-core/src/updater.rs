// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Updater registration shape and the handler contract.
//!
//! The handler-param view ([`ConditionValues`]) and the three fields of
//! [`HandlerOutput`] (`state`, `scope`, `actions`) are the entire contract
//! between an updater and the engine: handlers observe condition values and
//! return deltas, never references into the registry.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::action::Action;
use crate::condition::{CompiledCondition, ConditionSpec};
use crate::error::DynError;
use crate::frozen::Frozen;

/// Reducer callback: receives the condition values and the cycle context,
/// returns the staged update or an error (which rolls the cycle back).
pub type UpdaterHandler =
    Arc<dyn Fn(&ConditionValues, &HandlerCtx<'_>) -> Result<HandlerOutput, DynError>>;

/// A reducer registration: a condition list and a handler.
pub struct Updater {
    conditions: Vec<ConditionSpec>,
    handler: UpdaterHandler,
}

impl Updater {
    /// Creates an updater from its conditions and handler.
    pub fn new<I, C>(
        conditions: I,
        handler: impl Fn(&ConditionValues, &HandlerCtx<'_>) -> Result<HandlerOutput, DynError>
            + 'static,
    ) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<ConditionSpec>,
    {
        Self {
            conditions: conditions.into_iter().map(Into::into).collect(),
            handler: Arc::new(handler),
        }
    }

    pub(crate) fn into_parts(self) -> (Vec<ConditionSpec>, UpdaterHandler) {
        (self.conditions, self.handler)
    }
}

impl fmt::Debug for Updater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Updater")
            .field("conditions", &self.conditions)
            .finish_non_exhaustive()
    }
}

/// What a handler returns: optional state/scope deltas, queued follow-up
/// actions, and the passive flag suppressing the epic action.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    pub(crate) state: Option<Value>,
    pub(crate) scope: Option<Value>,
    pub(crate) actions: Vec<Action>,
    pub(crate) passive: bool,
}

impl HandlerOutput {
    /// An empty update: nothing staged, nothing queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a state delta, merged structurally onto the current state.
    #[must_use]
    pub fn with_state(mut self, delta: Value) -> Self {
        self.state = Some(delta);
        self
    }

    /// Stages a scope delta, merged structurally onto the current scope.
    #[must_use]
    pub fn with_scope(mut self, delta: Value) -> Self {
        self.scope = Some(delta);
        self
    }

    /// Queues a follow-up action, dispatched under external-action rules
    /// once the state delta has been staged.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<Action>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Suppresses the epic action for this update: the state still changes,
    /// but no cascade is triggered.
    #[must_use]
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }
}

/// The ordered handler-param view: one entry per condition of the firing
/// updater, `None` where the condition has never carried a value.
#[derive(Debug, Clone)]
pub struct ConditionValues(pub(crate) Vec<Option<Frozen>>);

impl ConditionValues {
    /// The value of the condition at `index`, if it has one.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(|v| v.as_deref())
    }

    /// Number of conditions in the view.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the values in condition order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&Value>> {
        self.0.iter().map(|v| v.as_deref())
    }
}

/// Cycle context handed to updater handlers alongside the condition values.
#[derive(Debug, Clone, Copy)]
pub struct HandlerCtx<'a> {
    /// Canonical state of the target instance as of the last commit.
    pub state: Option<&'a Value>,
    /// State staged so far within the current cycle.
    pub current_cycle_state: Option<&'a Value>,
    /// Canonical scope of the target instance as of the last commit.
    pub scope: Option<&'a Value>,
    /// Scope staged so far within the current cycle.
    pub current_cycle_scope: Option<&'a Value>,
    /// The action that opened the cycle.
    pub source_action: &'a Action,
    /// The action currently being pumped (may be a chained epic action).
    pub current_action: &'a Action,
}

/// A compiled concrete updater: one conjunctive condition vector bound to
/// its owning epic and handler. Disjunctions were expanded away at
/// registration, so several compiled updaters may share a handler.
pub(crate) struct CompiledUpdater {
    pub(crate) epic: String,
    /// Registration index of the originating reducer within its epic, used
    /// for error reporting and stable iteration.
    pub(crate) index: usize,
    pub(crate) conditions: Vec<CompiledCondition>,
    pub(crate) handler: UpdaterHandler,
}

impl fmt::Debug for CompiledUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledUpdater")
            .field("epic", &self.epic)
            .field("index", &self.index)
            .field("conditions", &self.conditions)
            .finish_non_exhaustive()
    }
}
