// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read-only introspection accessors, available on stores built with
//! `debug`. Every accessor returns an owned structural copy; nothing
//! handed out can alias or mutate the registry.

use serde::Serialize;
use serde_json::Value;

use crate::epic::InstanceKey;
use crate::frozen::{unfreeze, Slot};
use crate::store_impl::Store;

/// Structural copy of a compiled condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConditionView {
    /// Action type or epic name (possibly a wildcard).
    pub ty: String,
    /// Whether the condition is passive.
    pub passive: bool,
    /// Whether the condition is required.
    pub required: bool,
    /// Explicit instance target, if any.
    pub target: Option<String>,
    /// Last committed selector value, if the condition has carried one.
    pub value: Option<Value>,
}

/// Structural copy of a compiled updater.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdaterView {
    /// Owning epic name.
    pub epic: String,
    /// Registration index of the originating reducer within its epic.
    pub index: usize,
    /// The conjunctive condition vector.
    pub conditions: Vec<ConditionView>,
}

/// Structural copy of one listener variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListenerView {
    /// The listener's condition vector.
    pub conditions: Vec<ConditionView>,
}

impl Store {
    /// The committed state of a singleton epic's default instance.
    /// `None` without `debug`, for unknown epics, and for unwritten state.
    pub fn epic_state(&self, name: &str) -> Option<Value> {
        self.read_slot(name, &InstanceKey::Default, false)
    }

    /// The committed state of one instance of an instanced epic.
    pub fn instance_state(&self, name: &str, id: &str) -> Option<Value> {
        self.read_slot(name, &InstanceKey::Id(id.to_string()), false)
    }

    /// The committed scope of a singleton epic's default instance.
    pub fn epic_scope(&self, name: &str) -> Option<Value> {
        self.read_slot(name, &InstanceKey::Default, true)
    }

    /// The committed scope of one instance of an instanced epic.
    pub fn instance_scope(&self, name: &str, id: &str) -> Option<Value> {
        self.read_slot(name, &InstanceKey::Id(id.to_string()), true)
    }

    /// Structural copies of every updater registered by the named epic,
    /// in registration order. Empty without `debug`.
    pub fn epic_updaters(&self, name: &str) -> Vec<UpdaterView> {
        if !self.options.debug {
            return Vec::new();
        }
        let Some(entry) = self.registry.epics.get(name) else {
            return Vec::new();
        };
        entry
            .updater_ids
            .iter()
            .filter_map(|id| self.registry.updaters.get(*id).and_then(Option::as_ref))
            .map(|updater| UpdaterView {
                epic: updater.epic.clone(),
                index: updater.index,
                conditions: updater.conditions.iter().map(condition_view).collect(),
            })
            .collect()
    }

    /// Structural copies of every listener variant registered under the
    /// given literal type, in registration order. Empty without `debug`.
    pub fn type_listeners(&self, ty: &str) -> Vec<ListenerView> {
        if !self.options.debug {
            return Vec::new();
        }
        let Some(by_target) = self.registry.listener_index.get(ty) else {
            return Vec::new();
        };
        let mut refs: Vec<(usize, usize)> = by_target.values().flatten().copied().collect();
        refs.sort_unstable();
        refs.dedup();
        refs.into_iter()
            .filter_map(|(record_id, variant_idx)| {
                let record = self.registry.listeners.get(record_id)?.as_ref()?;
                let variant = record.variants.get(variant_idx)?;
                Some(ListenerView {
                    conditions: variant.conditions.iter().map(condition_view).collect(),
                })
            })
            .collect()
    }

    fn read_slot(&self, name: &str, key: &InstanceKey, scope: bool) -> Option<Value> {
        if !self.options.debug {
            return None;
        }
        let instance = self.registry.epics.get(name)?.instance(key)?;
        let slot = if scope { &instance.scope } else { &instance.state };
        match slot {
            Slot::Initial => None,
            Slot::Value(frozen) => Some(unfreeze(frozen)),
        }
    }
}

fn condition_view(condition: &crate::condition::CompiledCondition) -> ConditionView {
    ConditionView {
        ty: condition.ty.clone(),
        passive: condition.passive,
        required: condition.required,
        target: condition.target.clone(),
        value: match &condition.value {
            Slot::Initial => None,
            Slot::Value(frozen) => Some(unfreeze(frozen)),
        },
    }
}
