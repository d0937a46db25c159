// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Frozen value layer: immutable snapshots plus structural merge.
//!
//! Epic `state` and `scope` are stored as [`Slot`]s: either the `INITIAL`
//! sentinel (distinct from every user value, including `null`) or a frozen
//! [`serde_json::Value`] behind an `Arc`. [`merge_slot`] overlays a patch
//! onto a slot and returns the merged slot together with a pair of inverse
//! [`Patch`]es sufficient to walk the change in either direction without
//! reference to any live instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

/// A frozen snapshot of a user value.
pub type Frozen = Arc<Value>;

/// Freezes a value into an immutable shared snapshot.
pub(crate) fn freeze(value: Value) -> Frozen {
    Arc::new(value)
}

/// Deep-copies a frozen snapshot back into a mutable value.
pub(crate) fn unfreeze(frozen: &Frozen) -> Value {
    Value::clone(frozen)
}

/// Storage slot for epic state/scope and condition values.
///
/// `Initial` is the engine's absence sentinel. It is a distinct variant
/// rather than a magic value, so it can never collide with user data and
/// compares equal only to itself.
#[derive(Debug, Clone, Default)]
pub(crate) enum Slot {
    /// The value has never been written.
    #[default]
    Initial,
    /// A frozen user value.
    Value(Frozen),
}

impl Slot {
    pub(crate) fn value(frozen: Frozen) -> Self {
        Self::Value(frozen)
    }

    pub(crate) fn from_value(value: Value) -> Self {
        Self::Value(freeze(value))
    }

    pub(crate) fn is_initial(&self) -> bool {
        matches!(self, Self::Initial)
    }

    /// Surfaces the slot across the handler boundary: `INITIAL` becomes
    /// `None`, everything else a shared snapshot.
    pub(crate) fn as_option(&self) -> Option<Frozen> {
        match self {
            Self::Initial => None,
            Self::Value(v) => Some(Arc::clone(v)),
        }
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Initial, Self::Initial) => true,
            (Self::Value(a), Self::Value(b)) => a == b,
            _ => false,
        }
    }
}

/// A reversible structural patch produced by [`merge_slot`].
///
/// Patches are opaque to the cycle controller; the undo engine applies them
/// back with [`apply_patch`]. `Clear` restores the `INITIAL` sentinel and
/// only appears at the top level; `Remove` deletes a key and only appears
/// inside `Object`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Patch {
    /// Replace the whole value at this position.
    Replace(Value),
    /// Restore the `INITIAL` sentinel (top level only).
    Clear,
    /// Remove the key at this position (inverse of an insert).
    Remove,
    /// Recurse into object fields.
    Object(BTreeMap<String, Patch>),
}

/// Errors raised by the merge/apply primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    /// An object patch was laid over a non-object value.
    #[error("cannot merge an object patch into a non-object value at `{path}`")]
    ShapeMismatch {
        /// Dotted path to the offending position (`<root>` for the top level).
        path: String,
    },
    /// A recorded patch no longer matches the shape of the current value.
    #[error("recorded patch does not match the current value shape at `{path}`")]
    PatchMismatch {
        /// Dotted path to the offending position (`<root>` for the top level).
        path: String,
    },
}

const ROOT: &str = "<root>";

fn child_path(parent: &str, key: &str) -> String {
    if parent == ROOT {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Overlays `patch` onto `target` and returns `(merged, undo, redo)`.
///
/// Scalar (and array) patches replace wholesale; object patches recurse,
/// inserting absent keys. Merging anything onto an `INITIAL` slot is a
/// wholesale replacement whose undo restores the sentinel. An object patch
/// over a non-object value is a [`MergeError::ShapeMismatch`].
pub(crate) fn merge_slot(target: &Slot, patch: &Value) -> Result<(Slot, Patch, Patch), MergeError> {
    match target {
        Slot::Initial => Ok((
            Slot::from_value(patch.clone()),
            Patch::Clear,
            Patch::Replace(patch.clone()),
        )),
        Slot::Value(current) => match (current.as_ref(), patch) {
            (Value::Object(cur), Value::Object(pat)) => {
                let (merged, undo, redo) = merge_object(cur, pat, ROOT)?;
                Ok((
                    Slot::from_value(Value::Object(merged)),
                    Patch::Object(undo),
                    Patch::Object(redo),
                ))
            }
            (_, Value::Object(_)) => Err(MergeError::ShapeMismatch {
                path: ROOT.to_string(),
            }),
            (cur, pat) => Ok((
                Slot::from_value(pat.clone()),
                Patch::Replace(cur.clone()),
                Patch::Replace(pat.clone()),
            )),
        },
    }
}

fn merge_object(
    current: &Map<String, Value>,
    patch: &Map<String, Value>,
    path: &str,
) -> Result<(Map<String, Value>, BTreeMap<String, Patch>, BTreeMap<String, Patch>), MergeError> {
    let mut merged = current.clone();
    let mut undo = BTreeMap::new();
    let mut redo = BTreeMap::new();

    for (key, patch_value) in patch {
        let at = child_path(path, key);
        match current.get(key) {
            Some(Value::Object(cur_child)) => {
                if let Value::Object(pat_child) = patch_value {
                    let (child, child_undo, child_redo) = merge_object(cur_child, pat_child, &at)?;
                    if child_undo.is_empty() {
                        continue;
                    }
                    merged.insert(key.clone(), Value::Object(child));
                    undo.insert(key.clone(), Patch::Object(child_undo));
                    redo.insert(key.clone(), Patch::Object(child_redo));
                } else {
                    merged.insert(key.clone(), patch_value.clone());
                    undo.insert(key.clone(), Patch::Replace(Value::Object(cur_child.clone())));
                    redo.insert(key.clone(), Patch::Replace(patch_value.clone()));
                }
            }
            Some(cur_value) => {
                if patch_value.is_object() {
                    return Err(MergeError::ShapeMismatch { path: at });
                }
                if cur_value == patch_value {
                    continue;
                }
                merged.insert(key.clone(), patch_value.clone());
                undo.insert(key.clone(), Patch::Replace(cur_value.clone()));
                redo.insert(key.clone(), Patch::Replace(patch_value.clone()));
            }
            None => {
                merged.insert(key.clone(), patch_value.clone());
                undo.insert(key.clone(), Patch::Remove);
                redo.insert(key.clone(), Patch::Replace(patch_value.clone()));
            }
        }
    }

    Ok((merged, undo, redo))
}

/// Applies a recorded patch to a slot, producing the restored slot.
///
/// # Errors
/// Returns [`MergeError::PatchMismatch`] when the patch shape no longer
/// matches the current value (history corruption).
pub(crate) fn apply_patch(target: &Slot, patch: &Patch) -> Result<Slot, MergeError> {
    match patch {
        Patch::Clear => Ok(Slot::Initial),
        Patch::Replace(v) => Ok(Slot::from_value(v.clone())),
        Patch::Remove => Err(MergeError::PatchMismatch {
            path: ROOT.to_string(),
        }),
        Patch::Object(fields) => match target {
            Slot::Value(current) => {
                if let Value::Object(cur) = current.as_ref() {
                    let mut out = cur.clone();
                    apply_object(&mut out, fields, ROOT)?;
                    Ok(Slot::from_value(Value::Object(out)))
                } else {
                    Err(MergeError::PatchMismatch {
                        path: ROOT.to_string(),
                    })
                }
            }
            Slot::Initial => Err(MergeError::PatchMismatch {
                path: ROOT.to_string(),
            }),
        },
    }
}

fn apply_object(
    target: &mut Map<String, Value>,
    fields: &BTreeMap<String, Patch>,
    path: &str,
) -> Result<(), MergeError> {
    for (key, patch) in fields {
        let at = child_path(path, key);
        match patch {
            Patch::Remove => {
                if target.remove(key).is_none() {
                    return Err(MergeError::PatchMismatch { path: at });
                }
            }
            Patch::Replace(v) => {
                target.insert(key.clone(), v.clone());
            }
            Patch::Object(child_fields) => match target.get_mut(key) {
                Some(Value::Object(child)) => apply_object(child, child_fields, &at)?,
                _ => return Err(MergeError::PatchMismatch { path: at }),
            },
            Patch::Clear => return Err(MergeError::PatchMismatch { path: at }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn slot(v: Value) -> Slot {
        Slot::from_value(v)
    }

    #[test]
    fn scalar_replacement_records_both_directions() {
        let target = slot(json!(1));
        let (merged, undo, redo) = merge_slot(&target, &json!(2)).expect("merge");
        assert_eq!(merged, slot(json!(2)));
        assert_eq!(undo, Patch::Replace(json!(1)));
        assert_eq!(redo, Patch::Replace(json!(2)));
    }

    #[test]
    fn object_merge_recurses_and_inserts() {
        let target = slot(json!({"a": {"x": 1}, "b": 2}));
        let (merged, undo, redo) =
            merge_slot(&target, &json!({"a": {"x": 3, "y": 4}})).expect("merge");
        assert_eq!(merged, slot(json!({"a": {"x": 3, "y": 4}, "b": 2})));

        let undone = apply_patch(&merged, &undo).expect("undo");
        assert_eq!(undone, target);
        let redone = apply_patch(&undone, &redo).expect("redo");
        assert_eq!(redone, merged);
    }

    #[test]
    fn object_patch_over_scalar_is_rejected() {
        let target = slot(json!({"a": 1}));
        let err = merge_slot(&target, &json!({"a": {"nested": true}})).expect_err("shape");
        assert_eq!(
            err,
            MergeError::ShapeMismatch {
                path: "a".to_string()
            }
        );
    }

    #[test]
    fn merge_onto_initial_is_wholesale_and_undo_restores_the_sentinel() {
        let (merged, undo, redo) = merge_slot(&Slot::Initial, &json!({"n": 1})).expect("merge");
        assert_eq!(merged, slot(json!({"n": 1})));
        assert!(apply_patch(&merged, &undo).expect("undo").is_initial());
        assert_eq!(apply_patch(&Slot::Initial, &redo).expect("redo"), merged);
    }

    #[test]
    fn unchanged_scalar_fields_are_not_recorded() {
        let target = slot(json!({"a": 1, "b": 2}));
        let (merged, undo, _) = merge_slot(&target, &json!({"a": 1, "b": 3})).expect("merge");
        assert_eq!(merged, slot(json!({"a": 1, "b": 3})));
        let Patch::Object(fields) = undo else {
            panic!("expected object undo");
        };
        assert!(!fields.contains_key("a"));
        assert!(fields.contains_key("b"));
    }

    #[test]
    fn inserted_key_is_removed_on_undo() {
        let target = slot(json!({"a": 1}));
        let (merged, undo, _) = merge_slot(&target, &json!({"b": 2})).expect("merge");
        let undone = apply_patch(&merged, &undo).expect("undo");
        assert_eq!(undone, target);
    }

    #[test]
    fn stale_patch_reports_mismatch() {
        let target = slot(json!({"a": 1}));
        let (merged, undo, _) = merge_slot(&target, &json!({"b": 2})).expect("merge");
        // Undo twice: the second application no longer finds `b`.
        let undone = apply_patch(&merged, &undo).expect("first undo");
        let err = apply_patch(&undone, &undo).expect_err("second undo");
        assert_eq!(
            err,
            MergeError::PatchMismatch {
                path: "b".to_string()
            }
        );
    }

    #[test]
    fn initial_compares_only_to_itself() {
        assert_eq!(Slot::Initial, Slot::Initial);
        assert_ne!(Slot::Initial, slot(json!(null)));
        assert_ne!(slot(json!(null)), Slot::Initial);
    }
}
