// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Action shapes.
//!
//! External actions are what callers dispatch; epic actions are synthesized
//! by the engine (`type = epic name`, `payload = new state`) after a
//! successful state change to drive the cascade.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source action type reported to listeners during [`crate::Store::undo`].
pub const STORE_UNDO: &str = "STORE_UNDO";
/// Source action type reported to listeners during [`crate::Store::redo`].
pub const STORE_REDO: &str = "STORE_REDO";

/// A dispatched event: a type, an optional payload, and an optional epic
/// instance target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    ty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
}

impl Action {
    /// Creates a payload-less action of the given type.
    pub fn new(ty: impl Into<String>) -> Self {
        Self {
            ty: ty.into(),
            payload: None,
            target: None,
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Routes the action to a specific epic instance.
    #[must_use]
    pub fn with_target(mut self, id: impl Into<String>) -> Self {
        self.target = Some(id.into());
        self
    }

    /// The action type.
    pub fn ty(&self) -> &str {
        &self.ty
    }

    /// The payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// The instance target, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }
}

impl From<&str> for Action {
    fn from(ty: &str) -> Self {
        Self::new(ty)
    }
}

impl From<String> for Action {
    fn from(ty: String) -> Self {
        Self::new(ty)
    }
}
