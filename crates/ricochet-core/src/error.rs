// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Errors emitted by the store.
//!
//! Two taxa: programming errors (invariant violations during registration or
//! dispatch setup) abort the operation without mutating state; handler
//! errors (from reducer bodies) roll the whole cycle back before surfacing,
//! while listener errors are collected after commit and thrown as an
//! aggregate.

use thiserror::Error;

use crate::frozen::MergeError;

/// Opaque failure type returned by user handler and listener callbacks.
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Errors emitted by registration, dispatch, and history operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An epic with this name is already registered.
    #[error("duplicate epic: {0}")]
    DuplicateEpic(String),
    /// A condition type was empty, or used a wildcard on a store built
    /// without pattern support.
    #[error("invalid condition type `{ty}` (epic `{epic}`, updater {updater}, condition {condition})")]
    InvalidConditionType {
        /// Owning epic name.
        epic: String,
        /// Registration index of the reducer within the epic.
        updater: usize,
        /// Index of the condition within the reducer's condition list.
        condition: usize,
        /// The offending type string.
        ty: String,
    },
    /// A selector was supplied on a wildcard condition; the matched type
    /// varies, so pattern conditions receive the raw payload.
    #[error("selector not allowed on wildcard condition (epic `{epic}`, updater {updater}, condition {condition})")]
    InvalidConditionSelector {
        /// Owning epic name.
        epic: String,
        /// Registration index of the reducer within the epic.
        updater: usize,
        /// Index of the condition within the reducer's condition list.
        condition: usize,
    },
    /// Every updater needs at least one non-passive condition.
    #[error("updater {updater} of epic `{epic}` has no active conditions")]
    NoPassiveUpdaters {
        /// Owning epic name.
        epic: String,
        /// Registration index of the reducer within the epic.
        updater: usize,
    },
    /// A handler returned a delta that does not fit the current value shape.
    #[error("invalid handler update from epic `{epic}` updater {updater}: {source}")]
    InvalidHandlerUpdate {
        /// Owning epic name.
        epic: String,
        /// Registration index of the reducer within the epic.
        updater: usize,
        /// The underlying merge failure.
        #[source]
        source: MergeError,
    },
    /// An external action type collides with a registered epic name.
    #[error("action type `{0}` collides with a registered epic")]
    InvalidEpicAction(String),
    /// The same external action type was dispatched twice in one cycle.
    #[error("external action `{0}` was already dispatched in this cycle")]
    NoRepeatedExternalAction(String),
    /// Dispatch was attempted while epic listeners were running.
    #[error("dispatch is not allowed while epic listeners are running")]
    NoDispatchInEpicListener,
    /// A reducer handler failed; the cycle was rolled back.
    #[error("handler of epic `{epic}` updater {updater} failed: {source}")]
    UpdaterFailure {
        /// Owning epic name.
        epic: String,
        /// Registration index of the reducer within the epic.
        updater: usize,
        /// The handler's failure.
        #[source]
        source: DynError,
    },
    /// One or more listener handlers failed after the cycle committed.
    /// Committed state is unaffected.
    #[error("{} listener handler(s) failed after commit", .0.len())]
    ListenerFailures(Vec<DynError>),
    /// A recorded history patch no longer matches the current value shape.
    #[error("failed to apply history patch for epic `{epic}`: {source}")]
    HistoryPatch {
        /// Epic whose snapshot could not be restored.
        epic: String,
        /// The underlying patch failure.
        #[source]
        source: MergeError,
    },
    /// Internal invariant violated (engine state corruption).
    #[error("internal invariant violated: {0}")]
    InternalCorruption(&'static str),
}
