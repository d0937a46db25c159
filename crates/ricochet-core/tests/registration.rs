// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tests for registration and introspection: duplicate rejection,
//! disjunction expansion, unregistration, and the debug accessors.

use ricochet_core::{
    Condition, ConditionSpec, ConditionValues, Epic, HandlerCtx, HandlerOutput, Store, StoreError,
    Updater,
};
use serde_json::json;

fn bump_updater(trigger: &str) -> Updater {
    Updater::new([trigger], |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
        let counter = ctx
            .current_cycle_state
            .and_then(|state| state["counter"].as_i64())
            .unwrap_or(0);
        Ok(HandlerOutput::new().with_state(json!({"counter": counter + 1})))
    })
}

#[test]
fn duplicate_epic_names_are_rejected() {
    let mut store = Store::builder().build();
    store
        .register(Epic::new("e1").add_updater(bump_updater("a")))
        .expect("first registration");
    let err = store
        .register(Epic::new("e1").add_updater(bump_updater("b")))
        .expect_err("duplicate");
    assert!(matches!(err, StoreError::DuplicateEpic(ref name) if name == "e1"));
}

#[test]
fn empty_condition_type_is_rejected() {
    let mut store = Store::builder().build();
    let err = store
        .register(Epic::new("e1").add_updater(bump_updater("")))
        .expect_err("empty type");
    assert!(matches!(
        err,
        StoreError::InvalidConditionType { ref ty, .. } if ty.is_empty()
    ));
}

#[test]
fn any_of_conditions_expand_into_concrete_updaters() {
    let mut store = Store::builder().debug(true).build();
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(
                    [ConditionSpec::AnyOf(vec!["a1".into(), "a2".into()])],
                    |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
                        let counter = ctx
                            .current_cycle_state
                            .and_then(|state| state["counter"].as_i64())
                            .unwrap_or(0);
                        Ok(HandlerOutput::new().with_state(json!({"counter": counter + 1})))
                    },
                )),
        )
        .expect("register e1");

    // Both alternatives route to the shared handler, as separate compiled
    // updaters carrying the same reducer index.
    store.dispatch("a1").expect("a1");
    store.dispatch("a2").expect("a2");
    assert_eq!(store.epic_state("e1"), Some(json!({"counter": 2})));

    let views = store.epic_updaters("e1");
    assert_eq!(views.len(), 2);
    assert!(views.iter().all(|v| v.index == 0));
    assert_eq!(views[0].conditions[0].ty, "a1");
    assert_eq!(views[1].conditions[0].ty, "a2");
}

#[test]
fn unregister_removes_the_epic_and_its_indices() {
    let mut store = Store::builder().debug(true).build();
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(bump_updater("a")),
        )
        .expect("register e1");
    store
        .register(
            Epic::new("e2")
                .with_state(json!({"counter": 0}))
                .add_updater(bump_updater("a")),
        )
        .expect("register e2");

    assert!(store.unregister("e1"));
    assert!(!store.unregister("e1"));
    assert_eq!(store.epic_state("e1"), None);

    // e2 still updates; e1's index entries are gone.
    store.dispatch("a").expect("dispatch");
    assert_eq!(store.epic_state("e2"), Some(json!({"counter": 1})));

    // The freed name can be reused.
    store
        .register(Epic::new("e1").add_updater(bump_updater("b")))
        .expect("re-register");
}

#[test]
fn unregistered_epic_name_becomes_a_legal_action_type() {
    let mut store = Store::builder().build();
    store
        .register(Epic::new("e1").add_updater(bump_updater("a")))
        .expect("register");
    assert!(matches!(
        store.dispatch("e1").expect_err("collision"),
        StoreError::InvalidEpicAction(_)
    ));
    assert!(store.unregister("e1"));
    store.dispatch("e1").expect("no longer an epic name");
}

#[test]
fn listener_removal_is_idempotent() {
    let mut store = Store::builder().debug(true).build();
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(bump_updater("a")),
        )
        .expect("register");

    let fired = std::rc::Rc::new(std::cell::Cell::new(0u32));
    let seen = std::rc::Rc::clone(&fired);
    let id = store
        .add_listener(["e1"], move |_, _| {
            seen.set(seen.get() + 1);
            Ok(())
        })
        .expect("add listener");

    store.dispatch("a").expect("first");
    assert_eq!(fired.get(), 1);

    assert!(store.remove_listener(id));
    assert!(!store.remove_listener(id));

    store.dispatch("a").expect("second");
    assert_eq!(fired.get(), 1);
}

#[test]
fn introspection_is_gated_by_the_debug_flag() {
    let mut plain = Store::builder().build();
    plain
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(bump_updater("a")),
        )
        .expect("register");
    plain.dispatch("a").expect("dispatch");

    assert_eq!(plain.epic_state("e1"), None);
    assert_eq!(plain.epic_scope("e1"), None);
    assert!(plain.epic_updaters("e1").is_empty());
    assert!(plain.type_listeners("e1").is_empty());
}

#[test]
fn updater_views_are_detached_copies() {
    let mut store = Store::builder().debug(true).build();
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(
                    [Condition::new("a").required()],
                    |_: &ConditionValues, _: &HandlerCtx<'_>| {
                        Ok(HandlerOutput::new().with_state(json!({"counter": 1})))
                    },
                )),
        )
        .expect("register");

    let mut views = store.epic_updaters("e1");
    views[0].conditions[0].ty = "tampered".to_string();

    // Mutating the view changes nothing inside the store.
    let fresh = store.epic_updaters("e1");
    assert_eq!(fresh[0].conditions[0].ty, "a");
    assert!(fresh[0].conditions[0].required);
}
