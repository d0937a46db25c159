// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Epic listeners and the post-commit fan-out.
//!
//! Listeners observe committed changes; they run after the cycle has
//! promoted (or discarded) its staged values, receive the same
//! condition-value view as updaters, and must never dispatch. Their errors
//! are collected individually and surfaced as an aggregate, leaving
//! committed state untouched.

use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::condition::CompiledCondition;
use crate::epic::InstanceKey;
use crate::error::DynError;
use crate::frozen::Slot;
use crate::store_impl::Store;
use crate::updater::ConditionValues;

/// Listener callback: receives the condition values and the listener
/// context. A returned error is collected, not propagated mid-fan-out.
pub type ListenerHandler = Arc<dyn Fn(&ConditionValues, &ListenerCtx<'_>) -> Result<(), DynError>>;

/// Context handed to listener handlers.
#[derive(Debug, Clone, Copy)]
pub struct ListenerCtx<'a> {
    /// The action that opened the committed cycle (or the synthetic
    /// `STORE_UNDO` / `STORE_REDO` action for history navigation).
    pub source_action: &'a Action,
}

/// Handle returned by [`Store::add_listener`]; pass to
/// [`Store::remove_listener`] to unsubscribe. Removal is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) usize);

/// One conjunctive variant of a listener registration.
pub(crate) struct CompiledListener {
    pub(crate) conditions: Vec<CompiledCondition>,
    pub(crate) handler: ListenerHandler,
    /// Dedup flag for a single fan-out pass.
    pub(crate) processed: bool,
}

impl fmt::Debug for CompiledListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledListener")
            .field("conditions", &self.conditions)
            .field("processed", &self.processed)
            .finish_non_exhaustive()
    }
}

/// A listener registration: its disjunctive expansion shares one handler
/// and one [`ListenerId`].
#[derive(Debug)]
pub(crate) struct ListenerRecord {
    pub(crate) variants: Vec<CompiledListener>,
}

/// Reference to one listener variant: `(record id, variant index)`.
pub(crate) type ListenerRef = (usize, usize);

impl Store {
    /// Fans committed changes out to epic and pattern listeners.
    ///
    /// For every touched `(epic, instance)` in the cycle's epic cache,
    /// candidate listeners are gathered from the exact-type index (falling
    /// back from the instance key to the default target) and from every
    /// pattern key matching the epic name, deduplicated via the per-variant
    /// `processed` flag. Each candidate's conditions are re-evaluated over
    /// the committed registry state; the fire rule is: with any required
    /// condition present, fire iff every required condition changed,
    /// otherwise fire iff some active condition changed.
    ///
    /// Returns the collected handler errors; committed state is unaffected.
    pub(crate) fn process_epic_listeners(&mut self, source_action: &Action) -> Vec<DynError> {
        let mut errors = Vec::new();
        let mut visited: Vec<ListenerRef> = Vec::new();
        let epic_cache = self.cycle.epic_cache.clone();

        for (epic_name, keys) in &epic_cache {
            let matched_buckets: Vec<usize> = if self.options.patterns {
                self.registry
                    .pattern_listener_index
                    .iter()
                    .enumerate()
                    .filter(|(_, bucket)| bucket.regex.is_match(epic_name))
                    .map(|(i, _)| i)
                    .collect()
            } else {
                Vec::new()
            };

            for key in keys {
                let mut candidates: Vec<ListenerRef> = Vec::new();
                if let Some(by_target) = self.registry.listener_index.get(epic_name) {
                    gather(&mut candidates, |k| by_target.get(k), key);
                }
                for bucket_idx in &matched_buckets {
                    let bucket = &self.registry.pattern_listener_index[*bucket_idx];
                    gather(&mut candidates, |k| bucket.targets.get(k), key);
                }

                for (record_id, variant_idx) in candidates {
                    if self.run_listener(record_id, variant_idx, epic_name, key, source_action, &mut errors)
                    {
                        visited.push((record_id, variant_idx));
                    }
                }
            }
        }

        for (record_id, variant_idx) in visited {
            if let Some(Some(record)) = self.registry.listeners.get_mut(record_id) {
                let variant = &mut record.variants[variant_idx];
                for condition in &mut variant.conditions {
                    condition.promote();
                }
                variant.processed = false;
            }
        }

        if !errors.is_empty() {
            tracing::warn!(count = errors.len(), "listener handlers failed after commit");
        }
        errors
    }

    /// Evaluates and possibly fires one listener variant. Returns whether
    /// the variant was visited (and therefore needs its transients reset).
    fn run_listener(
        &mut self,
        record_id: usize,
        variant_idx: usize,
        epic_name: &str,
        key: &InstanceKey,
        source_action: &Action,
        errors: &mut Vec<DynError>,
    ) -> bool {
        // Compute each condition's current value against committed state
        // before borrowing the variant mutably.
        let current: Vec<Slot> = {
            let Some(Some(record)) = self.registry.listeners.get(record_id) else {
                return false;
            };
            let variant = &record.variants[variant_idx];
            if variant.processed {
                return false;
            }
            variant
                .conditions
                .iter()
                .map(|c| self.listener_condition_value(c, epic_name, key))
                .collect()
        };

        let Some(Some(record)) = self.registry.listeners.get_mut(record_id) else {
            return false;
        };
        let variant = &mut record.variants[variant_idx];
        variant.processed = true;

        let mut has_required = false;
        let mut has_unchanged_required = false;
        let mut has_changed_active = false;
        for (condition, slot) in variant.conditions.iter_mut().zip(current) {
            condition.staged = Some(slot);
            let changed = condition.is_active_now();
            if condition.required {
                has_required = true;
                if !changed {
                    has_unchanged_required = true;
                }
            }
            if !condition.passive && changed {
                has_changed_active = true;
            }
        }

        let fire = if has_required {
            !has_unchanged_required
        } else {
            has_changed_active
        };
        if !fire {
            return true;
        }

        let values = ConditionValues(
            variant
                .conditions
                .iter()
                .map(|c| c.effective().as_option())
                .collect(),
        );
        let handler = Arc::clone(&variant.handler);
        let ctx = ListenerCtx { source_action };
        tracing::trace!(epic = epic_name, "listener fired");
        if let Err(err) = handler(&values, &ctx) {
            errors.push(err);
        }
        true
    }

    /// The value a listener condition currently tracks: the committed state
    /// of the condition's epic, run through its selector.
    ///
    /// Exact conditions read their own epic; pattern conditions read the
    /// epic being fanned out. The instance is the condition's explicit
    /// target when set, the fan-out instance when the condition tracks the
    /// fanned-out epic, and the default slot otherwise.
    fn listener_condition_value(
        &self,
        condition: &CompiledCondition,
        epic_name: &str,
        key: &InstanceKey,
    ) -> Slot {
        let subject = if condition.is_pattern {
            epic_name
        } else {
            condition.ty.as_str()
        };
        let Some(entry) = self.registry.epics.get(subject) else {
            return condition.value.clone();
        };
        let instance_key = condition.target.as_ref().map_or_else(
            || {
                if subject == epic_name {
                    key.clone()
                } else {
                    InstanceKey::Default
                }
            },
            |t| InstanceKey::Id(t.clone()),
        );
        let Some(instance) = entry.instance(&instance_key) else {
            return condition.value.clone();
        };
        match &instance.state {
            Slot::Initial => Slot::Initial,
            Slot::Value(frozen) => {
                let selected = condition.select_readonly(frozen.as_ref(), subject);
                Slot::value(selected)
            }
        }
    }
}

fn gather<'a>(
    candidates: &mut Vec<ListenerRef>,
    lookup: impl Fn(&InstanceKey) -> Option<&'a Vec<ListenerRef>>,
    key: &InstanceKey,
) {
    if let Some(refs) = lookup(key) {
        candidates.extend(refs.iter().copied());
    } else if *key != InstanceKey::Default {
        if let Some(refs) = lookup(&InstanceKey::Default) {
            candidates.extend(refs.iter().copied());
        }
    }
}
