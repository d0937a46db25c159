// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Condition descriptors and the condition compiler.
//!
//! User-facing conditions arrive as [`ConditionSpec`]s: a bare action type,
//! a full [`Condition`], or an `AnyOf` disjunction. Compilation normalizes
//! them into [`CompiledCondition`]s and expands disjunctions at registration
//! time, so the runtime matcher only ever sees conjunctive vectors.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::frozen::{Frozen, Slot};

/// Pure projection from an action payload (and the concrete action type)
/// to the value a condition tracks.
pub type Selector = Arc<dyn Fn(&Value, &str) -> Value>;

/// Declarative predicate over an action type or another epic's state.
#[derive(Clone)]
pub struct Condition {
    ty: String,
    selector: Option<Selector>,
    passive: bool,
    required: bool,
    target: Option<String>,
}

impl Condition {
    /// Creates a condition on the given action type or epic name.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            selector: None,
            passive: false,
            required: false,
            target: None,
        }
    }

    /// Marks the condition passive: it participates in the handler's input
    /// view but never causes the updater to fire on its own.
    #[must_use]
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Marks the condition required: it must have changed this cycle for the
    /// updater to fire.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Installs a selector projecting the tracked value out of the payload.
    #[must_use]
    pub fn select(mut self, selector: impl Fn(&Value, &str) -> Value + 'static) -> Self {
        self.selector = Some(Arc::new(selector));
        self
    }

    /// Scopes the condition to a specific epic instance.
    #[must_use]
    pub fn on_instance(mut self, id: impl Into<String>) -> Self {
        self.target = Some(id.into());
        self
    }

    /// The action type or epic name this condition tracks.
    pub fn ty(&self) -> &str {
        &self.ty
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("ty", &self.ty)
            .field("passive", &self.passive)
            .field("required", &self.required)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl From<&str> for Condition {
    fn from(ty: &str) -> Self {
        Self::new(ty)
    }
}

impl From<String> for Condition {
    fn from(ty: String) -> Self {
        Self::new(ty)
    }
}

/// One slot of an updater's (or listener's) condition list.
#[derive(Debug, Clone)]
pub enum ConditionSpec {
    /// Bare action type, shorthand for `Condition::new(ty)`.
    Type(String),
    /// A fully specified condition.
    Single(Condition),
    /// Disjunction: the registration is expanded into one concrete updater
    /// per combination across every `AnyOf` in the list.
    AnyOf(Vec<ConditionSpec>),
}

impl From<&str> for ConditionSpec {
    fn from(ty: &str) -> Self {
        Self::Type(ty.to_string())
    }
}

impl From<String> for ConditionSpec {
    fn from(ty: String) -> Self {
        Self::Type(ty)
    }
}

impl From<Condition> for ConditionSpec {
    fn from(condition: Condition) -> Self {
        Self::Single(condition)
    }
}

/// Expands a condition list into fully conjunctive vectors, one per
/// combination across the disjunctions, the first disjunction varying
/// slowest.
pub(crate) fn split_conditions(specs: &[ConditionSpec]) -> Vec<Vec<Condition>> {
    let slots: Vec<Vec<Condition>> = specs.iter().map(alternatives).collect();
    let mut vectors: Vec<Vec<Condition>> = vec![Vec::new()];
    for alts in &slots {
        let mut next = Vec::with_capacity(vectors.len() * alts.len().max(1));
        for prefix in &vectors {
            for alt in alts {
                let mut vector = prefix.clone();
                vector.push(alt.clone());
                next.push(vector);
            }
        }
        vectors = next;
    }
    vectors
}

fn alternatives(spec: &ConditionSpec) -> Vec<Condition> {
    match spec {
        ConditionSpec::Type(ty) => vec![Condition::new(ty.clone())],
        ConditionSpec::Single(c) => vec![c.clone()],
        ConditionSpec::AnyOf(list) => list.iter().flat_map(alternatives).collect(),
    }
}

/// Whether a condition type routes through the pattern registry.
pub(crate) fn is_pattern(ty: &str) -> bool {
    ty.contains('*')
}

/// Compiles a wildcard type into its anchored matcher: `*` is the only
/// metacharacter and maps to a lazy `.*?`; everything else is literal.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for (i, literal) in pattern.split('*').enumerate() {
        if i > 0 {
            source.push_str(".*?");
        }
        source.push_str(&regex::escape(literal));
    }
    source.push('$');
    Regex::new(&source)
}

/// A condition after compilation: normalized shape, memoized selector, and
/// the per-cycle transient fields.
pub(crate) struct CompiledCondition {
    pub(crate) ty: String,
    pub(crate) is_pattern: bool,
    pub(crate) passive: bool,
    pub(crate) required: bool,
    pub(crate) target: Option<String>,
    selector: Option<Selector>,
    /// Cache of size one: last selector input and its output, so repeated
    /// identical payloads within a cycle dedupe to the same snapshot.
    memo: Option<(Value, Frozen)>,
    /// Last committed selector value.
    pub(crate) value: Slot,
    /// Staged selector value for the current cycle (`_value`).
    pub(crate) staged: Option<Slot>,
    /// Set when this condition matched the action through a pattern key.
    pub(crate) matched_pattern: bool,
}

impl CompiledCondition {
    pub(crate) fn has_selector(&self) -> bool {
        self.selector.is_some()
    }

    pub(crate) fn new(condition: Condition) -> Self {
        let is_pattern = is_pattern(&condition.ty);
        Self {
            ty: condition.ty,
            is_pattern,
            passive: condition.passive,
            required: condition.required,
            target: condition.target,
            selector: condition.selector,
            memo: None,
            value: Slot::Initial,
            staged: None,
            matched_pattern: false,
        }
    }

    /// Runs the selector over `payload`, memoized to the last input.
    pub(crate) fn select(&mut self, payload: &Value, ty: &str) -> Frozen {
        if let Some((last_in, last_out)) = &self.memo {
            if last_in == payload {
                return Arc::clone(last_out);
            }
        }
        let out = match &self.selector {
            Some(selector) => Arc::new(selector(payload, ty)),
            None => Arc::new(payload.clone()),
        };
        self.memo = Some((payload.clone(), Arc::clone(&out)));
        out
    }

    /// Runs the selector without touching the memo; used by the listener
    /// fan-out, which reads conditions through a shared registry borrow.
    pub(crate) fn select_readonly(&self, payload: &Value, ty: &str) -> Frozen {
        if let Some((last_in, last_out)) = &self.memo {
            if last_in == payload {
                return Arc::clone(last_out);
            }
        }
        match &self.selector {
            Some(selector) => Arc::new(selector(payload, ty)),
            None => Arc::new(payload.clone()),
        }
    }

    /// Whether the staged value differs from the last committed one.
    pub(crate) fn did_change(&self) -> bool {
        self.staged.as_ref().is_some_and(|staged| *staged != self.value)
    }

    /// Whether this condition counts as triggered for guard purposes.
    pub(crate) fn is_active_now(&self) -> bool {
        self.matched_pattern || self.did_change()
    }

    /// The value presented to handlers: staged if present, else committed.
    pub(crate) fn effective(&self) -> Slot {
        self.staged.clone().unwrap_or_else(|| self.value.clone())
    }

    /// Promotes the staged value to committed and clears transients.
    pub(crate) fn promote(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.value = staged;
        }
        self.matched_pattern = false;
    }

    /// Discards the staged value and clears transients.
    pub(crate) fn discard(&mut self) {
        self.staged = None;
        self.matched_pattern = false;
    }
}

impl fmt::Debug for CompiledCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCondition")
            .field("ty", &self.ty)
            .field("passive", &self.passive)
            .field("required", &self.required)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}
