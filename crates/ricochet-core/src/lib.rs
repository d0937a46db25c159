// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! ricochet-core: event-driven epic state engine.
//!
//! State lives in named **epics**: versioned pairs of public `state` and
//! private `scope` that mutate only through **updaters** bound to
//! declarative **conditions**. Dispatching an action drives a transitive
//! **cycle** — each staged state change chains a synthetic epic action,
//! propagating until quiescence — which commits atomically or rolls back
//! entirely. Optional wildcard routing, post-commit listeners, and bounded
//! undo/redo sit on top of the same condition machinery.
#![forbid(unsafe_code)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cognitive_complexity,
    clippy::option_if_let_else,
    clippy::significant_drop_tightening,
    clippy::doc_markdown,
    clippy::too_many_lines,
    clippy::struct_excessive_bools,
    clippy::too_long_first_doc_paragraph,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::similar_names,
    clippy::needless_pass_by_value,
    clippy::multiple_crate_versions
)]

mod action;
mod condition;
mod epic;
mod error;
mod frozen;
mod history;
mod introspect;
mod listener;
mod registry;
mod store_impl;
mod updater;

// Re-exports for stable public API
/// Action shape and the synthetic history source-action types.
pub use action::{Action, STORE_REDO, STORE_UNDO};
/// Condition descriptors and the selector seam.
pub use condition::{Condition, ConditionSpec, Selector};
/// Epic registration shape and instance addressing.
pub use epic::{Epic, InstanceKey};
/// Error surface: store errors plus the opaque handler failure type.
pub use error::{DynError, StoreError};
/// Frozen snapshot handle and value-layer errors.
pub use frozen::{Frozen, MergeError};
/// Structural introspection copies (debug stores only).
pub use introspect::{ConditionView, ListenerView, UpdaterView};
/// Listener callback seam and subscription handle.
pub use listener::{ListenerCtx, ListenerHandler, ListenerId};
/// The store and its builder.
pub use store_impl::{Store, StoreBuilder};
/// Updater registration shape and the handler contract.
pub use updater::{ConditionValues, HandlerCtx, HandlerOutput, Updater, UpdaterHandler};
