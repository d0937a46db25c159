// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tests for instanced epics: lazy materialization, targeted routing,
//! broadcast, and per-instance history.

use ricochet_core::{
    Action, Condition, ConditionValues, Epic, HandlerCtx, HandlerOutput, Store, Updater,
};
use serde_json::json;

fn instanced_counter() -> Epic {
    Epic::new("e1")
        .with_state(json!({"counter": 0}))
        .instanced()
        .add_updater(Updater::new(["bump"], |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
            let counter = ctx
                .current_cycle_state
                .and_then(|state| state["counter"].as_i64())
                .unwrap_or(0);
            Ok(HandlerOutput::new().with_state(json!({"counter": counter + 1})))
        }))
}

#[test]
fn targeted_actions_materialize_instances_lazily() {
    let mut store = Store::builder().debug(true).build();
    store.register(instanced_counter()).expect("register");

    store
        .dispatch(Action::new("bump").with_target("x"))
        .expect("bump x");
    assert_eq!(store.instance_state("e1", "x"), Some(json!({"counter": 1})));
    assert_eq!(store.instance_state("e1", "y"), None);
    // Instanced epics have no default slot.
    assert_eq!(store.epic_state("e1"), None);

    store
        .dispatch(Action::new("bump").with_target("y"))
        .expect("bump y");
    assert_eq!(store.instance_state("e1", "x"), Some(json!({"counter": 1})));
    assert_eq!(store.instance_state("e1", "y"), Some(json!({"counter": 1})));
}

#[test]
fn untargeted_actions_broadcast_to_existing_instances() {
    let mut store = Store::builder().debug(true).build();
    store.register(instanced_counter()).expect("register");

    store
        .dispatch(Action::new("bump").with_target("x"))
        .expect("bump x");
    store
        .dispatch(Action::new("bump").with_target("y"))
        .expect("bump y");
    store.dispatch("bump").expect("broadcast");

    assert_eq!(store.instance_state("e1", "x"), Some(json!({"counter": 2})));
    assert_eq!(store.instance_state("e1", "y"), Some(json!({"counter": 2})));
}

#[test]
fn broadcast_on_empty_instance_set_is_a_no_op() {
    let mut store = Store::builder().debug(true).build();
    store.register(instanced_counter()).expect("register");
    store.dispatch("bump").expect("broadcast with no instances");
    assert_eq!(store.instance_state("e1", "x"), None);
}

#[test]
fn instance_scoped_conditions_only_match_their_target() {
    let mut store = Store::builder().debug(true).build();
    store.register(instanced_counter()).expect("register");

    // e2 follows only instance `x` of e1.
    store
        .register(
            Epic::new("e2")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(
                    [Condition::new("e1").on_instance("x")],
                    |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
                        let counter = ctx
                            .current_cycle_state
                            .and_then(|state| state["counter"].as_i64())
                            .unwrap_or(0);
                        Ok(HandlerOutput::new().with_state(json!({"counter": counter + 1})))
                    },
                )),
        )
        .expect("register e2");

    store
        .dispatch(Action::new("bump").with_target("y"))
        .expect("bump y");
    assert_eq!(store.epic_state("e2"), Some(json!({"counter": 0})));

    store
        .dispatch(Action::new("bump").with_target("x"))
        .expect("bump x");
    assert_eq!(store.epic_state("e2"), Some(json!({"counter": 1})));
}

#[test]
fn undo_restores_each_touched_instance() {
    let mut store = Store::builder().debug(true).undo(true).build();
    store.register(instanced_counter()).expect("register");

    store
        .dispatch(Action::new("bump").with_target("x"))
        .expect("bump x");
    store
        .dispatch(Action::new("bump").with_target("y"))
        .expect("bump y");
    store.dispatch("bump").expect("broadcast");
    assert_eq!(store.instance_state("e1", "x"), Some(json!({"counter": 2})));

    store.undo().expect("undo broadcast");
    assert_eq!(store.instance_state("e1", "x"), Some(json!({"counter": 1})));
    assert_eq!(store.instance_state("e1", "y"), Some(json!({"counter": 1})));

    store.undo().expect("undo bump y");
    assert_eq!(store.instance_state("e1", "x"), Some(json!({"counter": 1})));
    assert_eq!(store.instance_state("e1", "y"), Some(json!({"counter": 0})));
}
