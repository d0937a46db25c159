// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Undo/redo: bounded stacks of per-cycle inverse patches.
//!
//! History navigation never re-runs reducers. It replays the recorded
//! patches against canonical state outside of any dispatch cycle, then
//! notifies listeners with a synthetic `STORE_UNDO` / `STORE_REDO` source
//! action. Unlike dispatch, history application does not roll back on
//! error; failures surface directly.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::action::{Action, STORE_REDO, STORE_UNDO};
use crate::epic::InstanceKey;
use crate::error::StoreError;
use crate::frozen::{apply_patch, MergeError, Patch, Slot};
use crate::store_impl::Store;

/// Which entity of an instance a patch applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntityKind {
    State,
    Scope,
}

/// Inverse patch sequences for one entity: `undo` replays newest-first,
/// `redo` oldest-first.
#[derive(Debug, Default)]
pub(crate) struct PatchPair {
    pub(crate) undo: Vec<Patch>,
    pub(crate) redo: Vec<Patch>,
}

/// Patches recorded for one instance within a cycle.
#[derive(Debug, Default)]
pub(crate) struct EntityPatches {
    pub(crate) state: Option<PatchPair>,
    pub(crate) scope: Option<PatchPair>,
}

/// Everything one committed cycle changed:
/// `epic → instance → {state?, scope?}` patch pairs.
#[derive(Debug, Default)]
pub(crate) struct UndoEntry {
    pub(crate) epics: BTreeMap<String, BTreeMap<InstanceKey, EntityPatches>>,
}

impl UndoEntry {
    pub(crate) fn record(
        &mut self,
        epic: &str,
        key: &InstanceKey,
        kind: EntityKind,
        undo: Patch,
        redo: Patch,
    ) {
        let patches = self
            .epics
            .entry(epic.to_string())
            .or_default()
            .entry(key.clone())
            .or_default();
        let pair = match kind {
            EntityKind::State => patches.state.get_or_insert_with(PatchPair::default),
            EntityKind::Scope => patches.scope.get_or_insert_with(PatchPair::default),
        };
        pair.undo.push(undo);
        pair.redo.push(redo);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.epics.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Undo,
    Redo,
}

/// The bounded undo stack and its redo counterpart.
#[derive(Debug, Default)]
pub(crate) struct History {
    pub(crate) undo_stack: VecDeque<UndoEntry>,
    pub(crate) redo_stack: Vec<UndoEntry>,
}

impl History {
    /// Pushes a committed cycle's entry, evicting the oldest entry exactly
    /// when the stack sits at its bound. The redo stack is cleared by the
    /// commit itself, which invalidates the redoable future whether or not
    /// the cycle staged any writes.
    pub(crate) fn push_undo(&mut self, entry: UndoEntry, max: usize) {
        if self.undo_stack.len() == max {
            self.undo_stack.pop_front();
        }
        self.undo_stack.push_back(entry);
    }
}

impl Store {
    /// Number of committed cycles currently undoable.
    pub fn undo_depth(&self) -> usize {
        self.history.undo_stack.len()
    }

    /// Number of undone cycles currently redoable.
    pub fn redo_depth(&self) -> usize {
        self.history.redo_stack.len()
    }

    /// Reverts the most recent committed cycle. A no-op when the store was
    /// built without undo or the stack is empty.
    pub fn undo(&mut self) -> Result<(), StoreError> {
        if !self.options.undo {
            return Ok(());
        }
        let Some(entry) = self.history.undo_stack.pop_back() else {
            return Ok(());
        };
        tracing::debug!("undo");
        let touched = self.apply_history_entry(&entry, Direction::Undo)?;
        self.history.redo_stack.push(entry);
        self.notify_history(touched, STORE_UNDO)
    }

    /// Re-applies the most recently undone cycle. A no-op when the store
    /// was built without undo or nothing was undone.
    pub fn redo(&mut self) -> Result<(), StoreError> {
        if !self.options.undo {
            return Ok(());
        }
        let Some(entry) = self.history.redo_stack.pop() else {
            return Ok(());
        };
        tracing::debug!("redo");
        let touched = self.apply_history_entry(&entry, Direction::Redo)?;
        if self.history.undo_stack.len() == self.options.max_undo_stack {
            self.history.undo_stack.pop_front();
        }
        self.history.undo_stack.push_back(entry);
        self.notify_history(touched, STORE_REDO)
    }

    /// Replays one history entry against canonical state and returns the
    /// touched epics/instances. Epics unregistered since the entry was
    /// recorded are skipped.
    fn apply_history_entry(
        &mut self,
        entry: &UndoEntry,
        direction: Direction,
    ) -> Result<BTreeMap<String, BTreeSet<InstanceKey>>, StoreError> {
        let mut touched: BTreeMap<String, BTreeSet<InstanceKey>> = BTreeMap::new();
        for (name, by_key) in &entry.epics {
            let Some(epic) = self.registry.epics.get_mut(name) else {
                continue;
            };
            for (key, patches) in by_key {
                let Some(instance) = epic.instance_mut(key) else {
                    continue;
                };
                if let Some(pair) = &patches.state {
                    instance.state = replay(&instance.state, pair, direction).map_err(|source| {
                        StoreError::HistoryPatch {
                            epic: name.clone(),
                            source,
                        }
                    })?;
                }
                if let Some(pair) = &patches.scope {
                    instance.scope = replay(&instance.scope, pair, direction).map_err(|source| {
                        StoreError::HistoryPatch {
                            epic: name.clone(),
                            source,
                        }
                    })?;
                }
                touched.entry(name.clone()).or_default().insert(key.clone());
            }
        }
        Ok(touched)
    }

    /// Notifies listeners of a history navigation with the synthetic source
    /// action type.
    fn notify_history(
        &mut self,
        touched: BTreeMap<String, BTreeSet<InstanceKey>>,
        ty: &str,
    ) -> Result<(), StoreError> {
        self.cycle.epic_cache = touched;
        let source = Action::new(ty);
        self.cycle.after_cycle = true;
        let errors = self.process_epic_listeners(&source);
        self.cycle.after_cycle = false;
        self.cycle.epic_cache.clear();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ListenerFailures(errors))
        }
    }
}

fn replay(slot: &Slot, pair: &PatchPair, direction: Direction) -> Result<Slot, MergeError> {
    let mut current = slot.clone();
    match direction {
        Direction::Undo => {
            for patch in pair.undo.iter().rev() {
                current = apply_patch(&current, patch)?;
            }
        }
        Direction::Redo => {
            for patch in &pair.redo {
                current = apply_patch(&current, patch)?;
            }
        }
    }
    Ok(current)
}
