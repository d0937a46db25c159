// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Registry: epics, updater indices, and listener indices.
//!
//! Registration is two-phase: everything is compiled and validated first,
//! then committed, so a failed registration never leaves partial entries
//! behind. Compiled updaters and listener records live in tombstoned arenas
//! (`Vec<Option<_>>`) so the per-type indices stay valid across
//! unregistration.

use std::collections::BTreeMap;

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::condition::{compile_pattern, split_conditions, CompiledCondition, ConditionSpec};
use crate::epic::{Epic, EpicEntry, InstanceKey};
use crate::error::StoreError;
use crate::listener::{CompiledListener, ListenerHandler, ListenerId, ListenerRecord, ListenerRef};
use crate::updater::CompiledUpdater;

/// Context string used in condition errors raised by listener registration.
const LISTENER_CONTEXT: &str = "(listener)";

/// A wildcard key in the updater pattern index, with its compiled matcher
/// and the updaters registered under it, in registration order.
#[derive(Debug)]
pub(crate) struct PatternBucket {
    pub(crate) raw: String,
    pub(crate) regex: Regex,
    pub(crate) updater_ids: Vec<usize>,
}

/// A wildcard key in the listener pattern index.
#[derive(Debug)]
pub(crate) struct PatternListenerBucket {
    pub(crate) raw: String,
    pub(crate) regex: Regex,
    pub(crate) targets: FxHashMap<InstanceKey, Vec<ListenerRef>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    /// Registered epics by name; `BTreeMap` for stable touched-epic order.
    pub(crate) epics: BTreeMap<String, EpicEntry>,
    /// Compiled updater arena; unregistration leaves tombstones.
    pub(crate) updaters: Vec<Option<CompiledUpdater>>,
    /// Literal action type → updater arena ids, in registration order.
    pub(crate) updater_index: FxHashMap<String, Vec<usize>>,
    /// Wildcard action types, in registration order.
    pub(crate) pattern_index: Vec<PatternBucket>,
    /// Listener record arena; removal leaves tombstones.
    pub(crate) listeners: Vec<Option<ListenerRecord>>,
    /// Literal epic name → instance target → listener refs.
    pub(crate) listener_index: FxHashMap<String, FxHashMap<InstanceKey, Vec<ListenerRef>>>,
    /// Wildcard epic names, in registration order.
    pub(crate) pattern_listener_index: Vec<PatternListenerBucket>,
}

impl Registry {
    /// Registers an epic: compiles and validates every updater, then commits
    /// the entry and its condition indices.
    pub(crate) fn register_epic(
        &mut self,
        epic: Epic,
        patterns_enabled: bool,
    ) -> Result<(), StoreError> {
        let (name, state, scope, updaters, instanced) = epic.into_parts();
        if self.epics.contains_key(&name) {
            return Err(StoreError::DuplicateEpic(name));
        }

        // Compile phase: nothing is mutated until every updater validates.
        let mut compiled: Vec<CompiledUpdater> = Vec::new();
        let mut regexes: FxHashMap<String, Regex> = FxHashMap::default();
        for (updater_index, updater) in updaters.into_iter().enumerate() {
            let (specs, handler) = updater.into_parts();
            for vector in split_conditions(&specs) {
                let conditions: Vec<CompiledCondition> =
                    vector.into_iter().map(CompiledCondition::new).collect();
                validate_conditions(&name, updater_index, &conditions, patterns_enabled, &mut regexes)?;
                if conditions.iter().all(|c| c.passive) {
                    return Err(StoreError::NoPassiveUpdaters {
                        epic: name.clone(),
                        updater: updater_index,
                    });
                }
                compiled.push(CompiledUpdater {
                    epic: name.clone(),
                    index: updater_index,
                    conditions,
                    handler: handler.clone(),
                });
            }
        }

        // Commit phase.
        let mut entry = EpicEntry::new(state, scope, instanced);
        for updater in compiled {
            let id = self.updaters.len();
            let mut seen: FxHashSet<&str> = FxHashSet::default();
            for condition in &updater.conditions {
                if !seen.insert(condition.ty.as_str()) {
                    continue;
                }
                if condition.is_pattern {
                    self.pattern_bucket(&condition.ty, &regexes)?.updater_ids.push(id);
                } else {
                    self.updater_index
                        .entry(condition.ty.clone())
                        .or_default()
                        .push(id);
                }
            }
            entry.updater_ids.push(id);
            self.updaters.push(Some(updater));
        }
        self.epics.insert(name, entry);
        Ok(())
    }

    /// Removes an epic and filters every condition index it owned.
    /// Returns whether the epic existed.
    pub(crate) fn unregister_epic(&mut self, name: &str) -> bool {
        let Some(entry) = self.epics.remove(name) else {
            return false;
        };
        for id in entry.updater_ids {
            if let Some(slot) = self.updaters.get_mut(id) {
                *slot = None;
            }
        }
        let updaters = &self.updaters;
        self.updater_index.retain(|_, ids| {
            ids.retain(|id| updaters.get(*id).is_some_and(Option::is_some));
            !ids.is_empty()
        });
        self.pattern_index.retain_mut(|bucket| {
            bucket
                .updater_ids
                .retain(|id| updaters.get(*id).is_some_and(Option::is_some));
            !bucket.updater_ids.is_empty()
        });
        true
    }

    /// Registers a listener: the disjunctive expansion shares one handler
    /// and one id.
    pub(crate) fn add_listener(
        &mut self,
        conditions: Vec<ConditionSpec>,
        handler: ListenerHandler,
        patterns_enabled: bool,
    ) -> Result<ListenerId, StoreError> {
        let mut regexes: FxHashMap<String, Regex> = FxHashMap::default();
        let mut variants: Vec<CompiledListener> = Vec::new();
        for vector in split_conditions(&conditions) {
            let compiled: Vec<CompiledCondition> =
                vector.into_iter().map(CompiledCondition::new).collect();
            validate_conditions(LISTENER_CONTEXT, 0, &compiled, patterns_enabled, &mut regexes)?;
            variants.push(CompiledListener {
                conditions: compiled,
                handler: handler.clone(),
                processed: false,
            });
        }

        let id = self.listeners.len();
        for (variant_idx, variant) in variants.iter().enumerate() {
            for condition in &variant.conditions {
                let target = condition
                    .target
                    .as_ref()
                    .map_or(InstanceKey::Default, |t| InstanceKey::Id(t.clone()));
                if condition.is_pattern {
                    self.pattern_listener_bucket(&condition.ty, &regexes)?
                        .entry(target)
                        .or_default()
                        .push((id, variant_idx));
                } else {
                    self.listener_index
                        .entry(condition.ty.clone())
                        .or_default()
                        .entry(target)
                        .or_default()
                        .push((id, variant_idx));
                }
            }
        }
        self.listeners.push(Some(ListenerRecord { variants }));
        Ok(ListenerId(id))
    }

    /// Removes a listener registration. Idempotent: returns whether the id
    /// was still live.
    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let Some(slot) = self.listeners.get_mut(id.0) else {
            return false;
        };
        if slot.take().is_none() {
            return false;
        }
        self.listener_index.retain(|_, by_target| {
            by_target.retain(|_, refs| {
                refs.retain(|(record_id, _)| *record_id != id.0);
                !refs.is_empty()
            });
            !by_target.is_empty()
        });
        self.pattern_listener_index.retain_mut(|bucket| {
            bucket.targets.retain(|_, refs| {
                refs.retain(|(record_id, _)| *record_id != id.0);
                !refs.is_empty()
            });
            !bucket.targets.is_empty()
        });
        true
    }

    fn pattern_bucket(
        &mut self,
        raw: &str,
        regexes: &FxHashMap<String, Regex>,
    ) -> Result<&mut PatternBucket, StoreError> {
        if let Some(pos) = self.pattern_index.iter().position(|b| b.raw == raw) {
            return Ok(&mut self.pattern_index[pos]);
        }
        let regex = regexes
            .get(raw)
            .cloned()
            .ok_or_else(|| StoreError::InternalCorruption("pattern compiled twice inconsistently"))?;
        self.pattern_index.push(PatternBucket {
            raw: raw.to_string(),
            regex,
            updater_ids: Vec::new(),
        });
        let last = self.pattern_index.len() - 1;
        Ok(&mut self.pattern_index[last])
    }

    fn pattern_listener_bucket(
        &mut self,
        raw: &str,
        regexes: &FxHashMap<String, Regex>,
    ) -> Result<&mut FxHashMap<InstanceKey, Vec<ListenerRef>>, StoreError> {
        if let Some(pos) = self.pattern_listener_index.iter().position(|b| b.raw == raw) {
            return Ok(&mut self.pattern_listener_index[pos].targets);
        }
        let regex = regexes
            .get(raw)
            .cloned()
            .ok_or_else(|| StoreError::InternalCorruption("pattern compiled twice inconsistently"))?;
        self.pattern_listener_index.push(PatternListenerBucket {
            raw: raw.to_string(),
            regex,
            targets: FxHashMap::default(),
        });
        let last = self.pattern_listener_index.len() - 1;
        Ok(&mut self.pattern_listener_index[last].targets)
    }
}

/// Validates one compiled condition vector, compiling wildcard matchers as
/// a side effect.
fn validate_conditions(
    context: &str,
    updater_index: usize,
    conditions: &[CompiledCondition],
    patterns_enabled: bool,
    regexes: &mut FxHashMap<String, Regex>,
) -> Result<(), StoreError> {
    for (condition_index, condition) in conditions.iter().enumerate() {
        if condition.ty.is_empty() {
            return Err(StoreError::InvalidConditionType {
                epic: context.to_string(),
                updater: updater_index,
                condition: condition_index,
                ty: condition.ty.clone(),
            });
        }
        if condition.is_pattern {
            if !patterns_enabled {
                return Err(StoreError::InvalidConditionType {
                    epic: context.to_string(),
                    updater: updater_index,
                    condition: condition_index,
                    ty: condition.ty.clone(),
                });
            }
            if condition.has_selector() {
                return Err(StoreError::InvalidConditionSelector {
                    epic: context.to_string(),
                    updater: updater_index,
                    condition: condition_index,
                });
            }
            if !regexes.contains_key(&condition.ty) {
                let regex = compile_pattern(&condition.ty).map_err(|_| {
                    StoreError::InvalidConditionType {
                        epic: context.to_string(),
                        updater: updater_index,
                        condition: condition_index,
                        ty: condition.ty.clone(),
                    }
                })?;
                regexes.insert(condition.ty.clone(), regex);
            }
        }
    }
    Ok(())
}
