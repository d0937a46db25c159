// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Core dispatch engine: updater evaluation, the action pump, and the cycle
//! controller.
//!
//! A dispatched action opens a cycle. The pump matches it against the
//! updater indices; each firing handler stages writes against instance
//! snapshots and may chain a synthetic epic action (processed depth-first)
//! or queue follow-up external actions. When the pump drains, the
//! controller either promotes every staged value to canonical (and records
//! an undo entry) or discards all of it, so a cycle is observable only as a
//! whole.
//!
//! Invariants re-established on every cycle exit:
//! - no condition carries a staged value or pattern-match flag,
//! - no instance carries a staged snapshot,
//! - the action/condition/epic caches are empty.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::action::Action;
use crate::condition::ConditionSpec;
use crate::epic::{Epic, InstanceKey};
use crate::error::{DynError, StoreError};
use crate::frozen::{merge_slot, Slot};
use crate::history::{EntityKind, History, UndoEntry};
use crate::listener::{ListenerCtx, ListenerId};
use crate::registry::Registry;
use crate::updater::{ConditionValues, HandlerCtx};

/// Store configuration; all flags default to off.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreOptions {
    pub(crate) debug: bool,
    pub(crate) patterns: bool,
    pub(crate) undo: bool,
    pub(crate) max_undo_stack: usize,
}

/// Fluent builder for [`Store`] instances.
///
/// # Example
///
/// ```rust
/// use ricochet_core::Store;
///
/// let store = Store::builder().patterns(true).undo(true).build();
/// # let _ = store;
/// ```
#[derive(Debug, Clone, Copy)]
pub struct StoreBuilder {
    debug: bool,
    patterns: bool,
    undo: bool,
    max_undo_stack: usize,
}

impl StoreBuilder {
    /// Creates a builder with every feature off and an undo depth of 10.
    pub fn new() -> Self {
        Self {
            debug: false,
            patterns: false,
            undo: false,
            max_undo_stack: 10,
        }
    }

    /// Enables the read-only introspection accessors.
    #[must_use]
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Enables wildcard condition and listener routing.
    #[must_use]
    pub fn patterns(mut self, enabled: bool) -> Self {
        self.patterns = enabled;
        self
    }

    /// Enables undo/redo stacks and patch recording.
    #[must_use]
    pub fn undo(mut self, enabled: bool) -> Self {
        self.undo = enabled;
        self
    }

    /// Sets the undo stack depth (minimum 1; oldest entries are evicted).
    #[must_use]
    pub fn max_undo_stack(mut self, depth: usize) -> Self {
        self.max_undo_stack = depth.max(1);
        self
    }

    /// Builds the store.
    #[must_use]
    pub fn build(self) -> Store {
        Store {
            options: StoreOptions {
                debug: self.debug,
                patterns: self.patterns,
                undo: self.undo,
                max_undo_stack: self.max_undo_stack,
            },
            registry: Registry::default(),
            cycle: CycleState::default(),
            history: History::default(),
        }
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reference to a condition staged during the current cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CondRef {
    pub(crate) updater: usize,
    pub(crate) condition: usize,
}

/// Per-cycle transient state shared across the dispatch call.
#[derive(Default)]
pub(crate) struct CycleState {
    pub(crate) in_cycle: bool,
    pub(crate) after_cycle: bool,
    pub(crate) source_action: Option<Action>,
    /// Action types seen this cycle, with their payloads.
    pub(crate) action_cache: FxHashMap<String, Option<Value>>,
    /// Conditions whose staged value must be promoted or discarded.
    pub(crate) condition_cache: Vec<CondRef>,
    /// Epics (and which instances) staged this cycle.
    pub(crate) epic_cache: BTreeMap<String, BTreeSet<InstanceKey>>,
    /// Inverse patches recorded for this cycle when undo is enabled.
    pub(crate) undo_entry: UndoEntry,
}

/// The event-driven epic store.
///
/// Epics register their reducers once; thereafter the only mutation path is
/// [`Store::dispatch`], which runs one atomic cycle, and the history
/// operations [`Store::undo`] / [`Store::redo`].
pub struct Store {
    pub(crate) options: StoreOptions,
    pub(crate) registry: Registry,
    pub(crate) cycle: CycleState,
    pub(crate) history: History,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("epics", &self.registry.epics.len())
            .field("updaters", &self.registry.updaters.len())
            .field("listeners", &self.registry.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Returns a builder with every feature off.
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    /// Registers an epic. Fails without mutating anything if the name is
    /// taken or any condition is invalid.
    pub fn register(&mut self, epic: Epic) -> Result<(), StoreError> {
        self.registry.register_epic(epic, self.options.patterns)
    }

    /// Removes an epic and every updater index entry it owned. Returns
    /// whether the epic existed.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.registry.unregister_epic(name)
    }

    /// Registers a listener over the given conditions. The handler runs
    /// after committed cycles that touched a matching epic.
    pub fn add_listener<I, C>(
        &mut self,
        conditions: I,
        handler: impl Fn(&ConditionValues, &ListenerCtx<'_>) -> Result<(), DynError> + 'static,
    ) -> Result<ListenerId, StoreError>
    where
        I: IntoIterator<Item = C>,
        C: Into<ConditionSpec>,
    {
        let conditions: Vec<ConditionSpec> = conditions.into_iter().map(Into::into).collect();
        self.registry
            .add_listener(conditions, Arc::new(handler), self.options.patterns)
    }

    /// Unsubscribes a listener. Idempotent: returns whether the id was
    /// still live.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.registry.remove_listener(id)
    }

    /// Dispatches an action, driving one full epic cycle to quiescence.
    ///
    /// On success every staged write has been promoted, listeners have run,
    /// and (with undo enabled) one undo entry has been pushed. On error the
    /// canonical state of every epic is exactly what it was before the
    /// call.
    pub fn dispatch(&mut self, action: impl Into<Action>) -> Result<(), StoreError> {
        let action = action.into();
        if self.cycle.after_cycle {
            return Err(StoreError::NoDispatchInEpicListener);
        }
        if self.cycle.in_cycle {
            // Re-entrant dispatch joins the active cycle under external
            // action rules.
            return self.process_action(&action, true);
        }
        if self.registry.epics.contains_key(action.ty()) {
            return Err(StoreError::InvalidEpicAction(action.ty().to_string()));
        }

        tracing::debug!(action = action.ty(), "cycle begin");
        self.begin_cycle(action.clone());
        let result = self.process_action(&action, true);
        self.cycle.in_cycle = false;
        self.cycle.after_cycle = true;

        let outcome = match result {
            Ok(()) => {
                self.commit_cycle();
                tracing::debug!(action = action.ty(), "cycle committed");
                let errors = self.process_epic_listeners(&action);
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(StoreError::ListenerFailures(errors))
                }
            }
            Err(err) => {
                self.rollback_cycle();
                tracing::debug!(action = action.ty(), error = %err, "cycle rolled back");
                Err(err)
            }
        };

        self.cleanup_cycle();
        self.cycle.after_cycle = false;
        outcome
    }

    fn begin_cycle(&mut self, action: Action) {
        self.cycle.action_cache.clear();
        self.cycle.condition_cache.clear();
        self.cycle.epic_cache.clear();
        self.cycle.undo_entry = UndoEntry::default();
        self.cycle.source_action = Some(action);
        self.cycle.in_cycle = true;
    }

    /// The action pump: matches one action against the direct and pattern
    /// updater indices, recursing depth-first into chained epic actions.
    fn process_action(&mut self, action: &Action, external: bool) -> Result<(), StoreError> {
        let ty = action.ty().to_string();
        if external {
            if self.registry.epics.contains_key(&ty) {
                return Err(StoreError::InvalidEpicAction(ty));
            }
            if self.cycle.action_cache.contains_key(&ty) {
                return Err(StoreError::NoRepeatedExternalAction(ty));
            }
        }
        self.cycle
            .action_cache
            .insert(ty.clone(), action.payload().cloned());

        // Direct updaters complete before any pattern updaters fire.
        let ids = self
            .registry
            .updater_index
            .get(&ty)
            .cloned()
            .unwrap_or_default();
        for id in ids {
            let Some((condition_idx, changed)) = self.stage_trigger(id, &ty, action) else {
                continue;
            };
            self.cycle.condition_cache.push(CondRef {
                updater: id,
                condition: condition_idx,
            });
            // A chained epic action whose selector value did not change
            // cannot re-trigger; this is the cycle's termination guard.
            if !external && !changed {
                continue;
            }
            self.process_updater(id, condition_idx, false, action)?;
        }

        if self.options.patterns {
            let buckets: Vec<(String, bool, Vec<usize>)> = self
                .registry
                .pattern_index
                .iter()
                .filter(|bucket| bucket.regex.is_match(&ty))
                .map(|bucket| {
                    (
                        bucket.raw.clone(),
                        bucket.raw == "*",
                        bucket.updater_ids.clone(),
                    )
                })
                .collect();
            for (raw, universal, ids) in buckets {
                for id in ids {
                    let Some(condition_idx) = self.stage_pattern_trigger(id, &raw, action) else {
                        continue;
                    };
                    self.cycle.condition_cache.push(CondRef {
                        updater: id,
                        condition: condition_idx,
                    });
                    // The `*` pattern forces a passive update: the handler
                    // runs but the epic action is suppressed, breaking
                    // trivially universal cycles.
                    self.process_updater(id, condition_idx, universal, action)?;
                }
            }
        }
        Ok(())
    }

    /// Locates the triggering condition of `updater` for a literal action
    /// type, stages its selector value, and reports whether it changed.
    fn stage_trigger(&mut self, id: usize, ty: &str, action: &Action) -> Option<(usize, bool)> {
        let updater = self.registry.updaters.get_mut(id)?.as_mut()?;
        let idx = updater.conditions.iter().position(|c| {
            c.ty == ty
                && c.target
                    .as_deref()
                    .is_none_or(|target| action.target() == Some(target))
        })?;
        let condition = &mut updater.conditions[idx];
        let null = Value::Null;
        let payload = action.payload().unwrap_or(&null);
        let selected = condition.select(payload, action.ty());
        condition.staged = Some(Slot::value(selected));
        Some((idx, condition.did_change()))
    }

    /// Stages the pattern condition of `updater` for a wildcard key match.
    fn stage_pattern_trigger(&mut self, id: usize, raw: &str, action: &Action) -> Option<usize> {
        let updater = self.registry.updaters.get_mut(id)?.as_mut()?;
        let idx = updater.conditions.iter().position(|c| c.ty == raw)?;
        let condition = &mut updater.conditions[idx];
        let null = Value::Null;
        let payload = action.payload().unwrap_or(&null);
        let selected = condition.select(payload, action.ty());
        condition.staged = Some(Slot::value(selected));
        condition.matched_pattern = true;
        Some(idx)
    }

    /// The updater evaluator: guards, instance selection, handler
    /// invocation, staging, and chaining.
    fn process_updater(
        &mut self,
        id: usize,
        trigger: usize,
        force_passive: bool,
        action: &Action,
    ) -> Result<(), StoreError> {
        let (epic_name, updater_index, handler) = {
            let Some(Some(updater)) = self.registry.updaters.get(id) else {
                return Ok(());
            };
            let conditions = &updater.conditions;

            // A passive trigger only proceeds when some other active
            // condition already moved this cycle.
            if conditions[trigger].passive {
                let any_active = conditions
                    .iter()
                    .enumerate()
                    .any(|(i, k)| i != trigger && !k.passive && k.is_active_now());
                if !any_active {
                    return Ok(());
                }
            }
            // Conjunction guard: every other required condition must have
            // moved this cycle.
            for (i, k) in conditions.iter().enumerate() {
                if i == trigger || k.passive || !k.required {
                    continue;
                }
                if !k.is_active_now() {
                    return Ok(());
                }
            }
            (
                updater.epic.clone(),
                updater.index,
                Arc::clone(&updater.handler),
            )
        };

        let targets: Vec<InstanceKey> = {
            let entry = self
                .registry
                .epics
                .get_mut(&epic_name)
                .ok_or_else(|| StoreError::InternalCorruption("updater owned by unknown epic"))?;
            if !entry.instanced {
                vec![InstanceKey::Default]
            } else if let Some(target) = action.target() {
                entry.ensure_instance(target);
                vec![InstanceKey::Id(target.to_string())]
            } else {
                entry.instances.keys().cloned().collect()
            }
        };

        let source_action = self
            .cycle
            .source_action
            .clone()
            .ok_or_else(|| StoreError::InternalCorruption("no source action inside cycle"))?;

        for key in targets {
            let (state, staged_state, scope, staged_scope) = {
                let entry = self
                    .registry
                    .epics
                    .get_mut(&epic_name)
                    .ok_or_else(|| StoreError::InternalCorruption("epic vanished mid-cycle"))?;
                let instance = entry
                    .instance_mut(&key)
                    .ok_or_else(|| StoreError::InternalCorruption("instance vanished mid-cycle"))?;
                instance.stage();
                (
                    instance.state.as_option(),
                    instance.staged_state.as_ref().and_then(Slot::as_option),
                    instance.scope.as_option(),
                    instance.staged_scope.as_ref().and_then(Slot::as_option),
                )
            };
            self.cycle
                .epic_cache
                .entry(epic_name.clone())
                .or_default()
                .insert(key.clone());

            let values = {
                let Some(Some(updater)) = self.registry.updaters.get(id) else {
                    return Ok(());
                };
                ConditionValues(
                    updater
                        .conditions
                        .iter()
                        .map(|c| c.effective().as_option())
                        .collect(),
                )
            };

            let ctx = HandlerCtx {
                state: state.as_deref(),
                current_cycle_state: staged_state.as_deref(),
                scope: scope.as_deref(),
                current_cycle_scope: staged_scope.as_deref(),
                source_action: &source_action,
                current_action: action,
            };
            tracing::trace!(epic = %epic_name, updater = updater_index, "updater fired");
            let output = handler(&values, &ctx).map_err(|source| StoreError::UpdaterFailure {
                epic: epic_name.clone(),
                updater: updater_index,
                source,
            })?;

            // Scope is staged before state, so a chained epic action already
            // observes both.
            if let Some(delta) = &output.scope {
                self.apply_delta(&epic_name, &key, EntityKind::Scope, delta, updater_index)?;
            }
            let state_updated = output.state.is_some();
            if let Some(delta) = &output.state {
                self.apply_delta(&epic_name, &key, EntityKind::State, delta, updater_index)?;
            }

            if state_updated && !force_passive && !output.passive {
                let payload = {
                    let entry = self
                        .registry
                        .epics
                        .get(&epic_name)
                        .ok_or_else(|| StoreError::InternalCorruption("epic vanished mid-cycle"))?;
                    let instance = entry
                        .instance(&key)
                        .ok_or_else(|| StoreError::InternalCorruption("instance vanished mid-cycle"))?;
                    instance.staged_state.as_ref().and_then(Slot::as_option)
                };
                let mut chained = Action::new(epic_name.clone());
                if let Some(payload) = payload {
                    chained = chained.with_payload(Value::clone(&payload));
                }
                if let Some(target) = key.id() {
                    chained = chained.with_target(target);
                }
                self.process_action(&chained, false)?;
            }

            for queued in &output.actions {
                self.process_action(queued, true)?;
            }
        }
        Ok(())
    }

    /// Merges a handler delta into the staged slot of `(epic, key)` and
    /// records the inverse patches when undo is enabled.
    fn apply_delta(
        &mut self,
        epic: &str,
        key: &InstanceKey,
        kind: EntityKind,
        delta: &Value,
        updater_index: usize,
    ) -> Result<(), StoreError> {
        let entry = self
            .registry
            .epics
            .get_mut(epic)
            .ok_or_else(|| StoreError::InternalCorruption("epic vanished mid-cycle"))?;
        let instance = entry
            .instance_mut(key)
            .ok_or_else(|| StoreError::InternalCorruption("instance vanished mid-cycle"))?;
        let slot = match kind {
            EntityKind::State => &mut instance.staged_state,
            EntityKind::Scope => &mut instance.staged_scope,
        };
        let current = slot
            .take()
            .ok_or_else(|| StoreError::InternalCorruption("write to unstaged instance"))?;
        match merge_slot(&current, delta) {
            Ok((merged, undo, redo)) => {
                *slot = Some(merged);
                if self.options.undo {
                    self.cycle.undo_entry.record(epic, key, kind, undo, redo);
                }
                Ok(())
            }
            Err(source) => {
                *slot = Some(current);
                Err(StoreError::InvalidHandlerUpdate {
                    epic: epic.to_string(),
                    updater: updater_index,
                    source,
                })
            }
        }
    }

    /// Promotes every staged condition value and instance snapshot, then
    /// pushes the cycle's undo entry.
    fn commit_cycle(&mut self) {
        for cond_ref in &self.cycle.condition_cache {
            if let Some(Some(updater)) = self.registry.updaters.get_mut(cond_ref.updater) {
                if let Some(condition) = updater.conditions.get_mut(cond_ref.condition) {
                    condition.promote();
                }
            }
        }
        for (name, keys) in &self.cycle.epic_cache {
            if let Some(entry) = self.registry.epics.get_mut(name) {
                for key in keys {
                    if let Some(instance) = entry.instance_mut(key) {
                        instance.promote();
                    }
                }
            }
        }
        if self.options.undo {
            // Every successful commit invalidates the redoable future, even
            // one that staged no writes.
            self.history.redo_stack.clear();
            let entry = std::mem::take(&mut self.cycle.undo_entry);
            if !entry.is_empty() {
                self.history.push_undo(entry, self.options.max_undo_stack);
            }
        }
    }

    /// Discards every staged condition value and instance snapshot.
    fn rollback_cycle(&mut self) {
        for cond_ref in &self.cycle.condition_cache {
            if let Some(Some(updater)) = self.registry.updaters.get_mut(cond_ref.updater) {
                if let Some(condition) = updater.conditions.get_mut(cond_ref.condition) {
                    condition.discard();
                }
            }
        }
        for (name, keys) in &self.cycle.epic_cache {
            if let Some(entry) = self.registry.epics.get_mut(name) {
                for key in keys {
                    if let Some(instance) = entry.instance_mut(key) {
                        instance.discard();
                    }
                }
            }
        }
        self.cycle.undo_entry = UndoEntry::default();
    }

    /// Clears the per-cycle caches, re-establishing the at-rest invariant.
    fn cleanup_cycle(&mut self) {
        self.cycle.action_cache.clear();
        self.cycle.condition_cache.clear();
        self.cycle.epic_cache.clear();
        self.cycle.source_action = None;
    }
}
