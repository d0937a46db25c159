// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tests for atomic rollback: a failing handler discards every staged
//! write, leaves the undo stack untouched, and fires no listeners.

use std::cell::Cell;
use std::rc::Rc;

use ricochet_core::{
    ConditionValues, Epic, HandlerCtx, HandlerOutput, Store, StoreError, Updater,
};
use serde_json::json;

#[test]
fn failing_second_update_rolls_back_the_whole_cycle() {
    let mut store = Store::builder().debug(true).undo(true).build();

    // Two reducers on `a` share one failure counter: the first stages a
    // write, the second invocation fails the cycle.
    let calls = Rc::new(Cell::new(0u32));
    let shared_handler = |calls: &Rc<Cell<u32>>| {
        let calls = Rc::clone(calls);
        move |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
            calls.set(calls.get() + 1);
            if calls.get() == 2 {
                return Err("second invocation fails".into());
            }
            let counter = ctx
                .current_cycle_state
                .and_then(|state| state["counter"].as_i64())
                .unwrap_or(0);
            Ok(HandlerOutput::new().with_state(json!({"counter": counter + 1})))
        }
    };
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(["a"], shared_handler(&calls)))
                .add_updater(Updater::new(["a"], shared_handler(&calls))),
        )
        .expect("register e1");

    let err = store.dispatch("a").expect_err("dispatch fails");
    assert!(matches!(
        err,
        StoreError::UpdaterFailure { ref epic, updater: 1, .. } if epic == "e1"
    ));
    assert_eq!(calls.get(), 2);

    // Canonical state is exactly the pre-dispatch state.
    assert_eq!(store.epic_state("e1"), Some(json!({"counter": 0})));
    assert_eq!(store.undo_depth(), 0);

    // A later cycle starts clean.
    store.dispatch("b").expect("unmatched dispatch commits");
}

#[test]
fn rolled_back_cycle_fires_no_listeners() {
    let mut store = Store::builder().debug(true).build();

    // The second updater fails only on the first cycle.
    let failed_once = Rc::new(Cell::new(false));
    let fail_flag = Rc::clone(&failed_once);
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(["a"], |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
                    let counter = ctx
                        .current_cycle_state
                        .and_then(|state| state["counter"].as_i64())
                        .unwrap_or(0);
                    Ok(HandlerOutput::new().with_state(json!({"counter": counter + 1})))
                }))
                .add_updater(Updater::new(["a"], move |_: &ConditionValues, _: &HandlerCtx<'_>| {
                    if fail_flag.replace(true) {
                        Ok(HandlerOutput::new())
                    } else {
                        Err("boom".into())
                    }
                })),
        )
        .expect("register e1");

    let fired = Rc::new(Cell::new(0u32));
    let seen = Rc::clone(&fired);
    store
        .add_listener(["e1"], move |_, _| {
            seen.set(seen.get() + 1);
            Ok(())
        })
        .expect("add listener");

    store.dispatch("a").expect_err("dispatch fails");
    assert_eq!(fired.get(), 0);

    // The same listener fires once the cycle actually commits.
    store.dispatch("a").expect("second dispatch commits");
    assert_eq!(fired.get(), 1);
    assert_eq!(store.epic_state("e1"), Some(json!({"counter": 1})));
}

#[test]
fn invalid_handler_update_reports_updater_context() {
    let mut store = Store::builder().debug(true).build();

    // Second update lays an object over a scalar without replacement.
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"field": 1}))
                .add_updater(Updater::new(["a"], |_: &ConditionValues, _: &HandlerCtx<'_>| {
                    Ok(HandlerOutput::new().with_state(json!({"field": {"nested": true}})))
                })),
        )
        .expect("register e1");

    let err = store.dispatch("a").expect_err("shape mismatch");
    assert!(matches!(
        err,
        StoreError::InvalidHandlerUpdate { ref epic, updater: 0, .. } if epic == "e1"
    ));
    assert_eq!(store.epic_state("e1"), Some(json!({"field": 1})));
}

#[test]
fn external_action_colliding_with_epic_name_is_rejected() {
    let mut store = Store::builder().debug(true).build();
    store
        .register(
            Epic::new("e1")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(["a"], |_: &ConditionValues, _: &HandlerCtx<'_>| {
                    Ok(HandlerOutput::new().with_state(json!({"counter": 1})))
                })),
        )
        .expect("register e1");

    let err = store.dispatch("e1").expect_err("epic name collision");
    assert!(matches!(err, StoreError::InvalidEpicAction(ref ty) if ty == "e1"));
    assert_eq!(store.epic_state("e1"), Some(json!({"counter": 0})));
}
