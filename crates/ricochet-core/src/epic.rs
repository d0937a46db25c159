// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Epic registration shape and multi-instance epic state.
//!
//! Each registered epic holds a set of instances keyed by [`InstanceKey`].
//! Singleton epics own exactly the [`InstanceKey::Default`] instance, seeded
//! at registration. Instanced epics start empty and materialize instances
//! lazily from the registration-time template, one per target id.
//!
//! Determinism contract: instance maps are `BTreeMap` so touched-instance
//! iteration during commit, listener fan-out, and undo is stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frozen::Slot;
use crate::updater::Updater;

/// Key addressing one replica of an epic's state.
///
/// `Default` is the sentinel for singleton epics and for listeners unscoped
/// to a specific instance. It is a variant rather than a reserved string, so
/// it can never collide with a user-chosen id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum InstanceKey {
    /// The singleton / unscoped slot.
    #[default]
    Default,
    /// A user-addressed instance.
    Id(String),
}

impl InstanceKey {
    /// The user-facing id, if this key addresses a named instance.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Id(id) => Some(id),
        }
    }
}

/// Registration shape for an epic: a unique name, optional initial state
/// and scope, its updaters, and whether it is instanced.
#[derive(Debug)]
pub struct Epic {
    name: String,
    state: Option<Value>,
    scope: Option<Value>,
    updaters: Vec<Updater>,
    instanced: bool,
}

impl Epic {
    /// Creates an epic with no initial state, scope, or updaters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: None,
            scope: None,
            updaters: Vec::new(),
            instanced: false,
        }
    }

    /// Sets the initial public state.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Sets the initial private scope.
    #[must_use]
    pub fn with_scope(mut self, scope: Value) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Appends an updater. Updaters fire in registration order.
    #[must_use]
    pub fn add_updater(mut self, updater: Updater) -> Self {
        self.updaters.push(updater);
        self
    }

    /// Marks the epic instanced: state/scope replicas are kept per target
    /// id instead of in a single default slot. The choice is for the epic's
    /// lifetime.
    #[must_use]
    pub fn instanced(mut self) -> Self {
        self.instanced = true;
        self
    }

    /// The epic's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, Option<Value>, Option<Value>, Vec<Updater>, bool) {
        (self.name, self.state, self.scope, self.updaters, self.instanced)
    }
}

/// One state/scope replica plus its per-cycle staging slots.
#[derive(Debug, Clone)]
pub(crate) struct EpicInstance {
    pub(crate) state: Slot,
    pub(crate) scope: Slot,
    /// Snapshot being written this cycle (`_state`); `None` at rest.
    pub(crate) staged_state: Option<Slot>,
    /// Snapshot being written this cycle (`_scope`); `None` at rest.
    pub(crate) staged_scope: Option<Slot>,
}

impl EpicInstance {
    fn new(state: Slot, scope: Slot) -> Self {
        Self {
            state,
            scope,
            staged_state: None,
            staged_scope: None,
        }
    }

    /// Lazily begins staging: snapshots the canonical values on first touch
    /// within a cycle.
    pub(crate) fn stage(&mut self) {
        if self.staged_state.is_none() {
            self.staged_state = Some(self.state.clone());
        }
        if self.staged_scope.is_none() {
            self.staged_scope = Some(self.scope.clone());
        }
    }

    pub(crate) fn promote(&mut self) {
        if let Some(state) = self.staged_state.take() {
            self.state = state;
        }
        if let Some(scope) = self.staged_scope.take() {
            self.scope = scope;
        }
    }

    pub(crate) fn discard(&mut self) {
        self.staged_state = None;
        self.staged_scope = None;
    }
}

/// A registered epic: the instance map plus the registration template used
/// to seed lazily created instances.
#[derive(Debug)]
pub(crate) struct EpicEntry {
    template_state: Slot,
    template_scope: Slot,
    pub(crate) instanced: bool,
    pub(crate) instances: BTreeMap<InstanceKey, EpicInstance>,
    /// Arena ids of the compiled updaters owned by this epic.
    pub(crate) updater_ids: Vec<usize>,
}

impl EpicEntry {
    pub(crate) fn new(state: Option<Value>, scope: Option<Value>, instanced: bool) -> Self {
        let template_state = state.map_or(Slot::Initial, Slot::from_value);
        let template_scope = scope.map_or(Slot::Initial, Slot::from_value);
        let mut instances = BTreeMap::new();
        if !instanced {
            instances.insert(
                InstanceKey::Default,
                EpicInstance::new(template_state.clone(), template_scope.clone()),
            );
        }
        Self {
            template_state,
            template_scope,
            instanced,
            instances,
            updater_ids: Vec::new(),
        }
    }

    pub(crate) fn instance(&self, key: &InstanceKey) -> Option<&EpicInstance> {
        self.instances.get(key)
    }

    pub(crate) fn instance_mut(&mut self, key: &InstanceKey) -> Option<&mut EpicInstance> {
        self.instances.get_mut(key)
    }

    /// Returns the instance for `id`, materializing it from the template on
    /// first use.
    pub(crate) fn ensure_instance(&mut self, id: &str) -> &mut EpicInstance {
        self.instances
            .entry(InstanceKey::Id(id.to_string()))
            .or_insert_with(|| {
                EpicInstance::new(self.template_state.clone(), self.template_scope.clone())
            })
    }
}
