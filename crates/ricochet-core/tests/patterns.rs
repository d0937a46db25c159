// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tests for wildcard routing: anchored matching, the `*` cascade cut, and
//! pattern registration rules.

use ricochet_core::{
    Condition, ConditionValues, Epic, HandlerCtx, HandlerOutput, Store, StoreError, Updater,
};
use serde_json::json;

fn counter_updater() -> Updater {
    Updater::new(["unused"], |_: &ConditionValues, _: &HandlerCtx<'_>| {
        Ok(HandlerOutput::new())
    })
}

fn bump(ctx: &HandlerCtx<'_>) -> HandlerOutput {
    let counter = ctx
        .current_cycle_state
        .and_then(|state| state["counter"].as_i64())
        .unwrap_or(0);
    HandlerOutput::new().with_state(json!({"counter": counter + 1}))
}

#[test]
fn star_pattern_updates_but_does_not_cascade() {
    let mut store = Store::builder().debug(true).patterns(true).build();

    store
        .register(
            Epic::new("sink")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(["*"], |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
                    Ok(bump(ctx))
                })),
        )
        .expect("register sink");
    // Would fire on a synthetic `sink` action if one were ever emitted.
    store
        .register(
            Epic::new("probe")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(["si*"], |_: &ConditionValues, ctx: &HandlerCtx<'_>| {
                    Ok(bump(ctx))
                })),
        )
        .expect("register probe");

    store.dispatch("a").expect("dispatch a");

    assert_eq!(store.epic_state("sink"), Some(json!({"counter": 1})));
    assert_eq!(store.epic_state("probe"), Some(json!({"counter": 0})));
}

#[test]
fn non_star_patterns_chain_their_epic_actions() {
    let mut store = Store::builder().debug(true).patterns(true).build();

    store
        .register(
            Epic::new("audit")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(
                    ["user.*"],
                    |_: &ConditionValues, ctx: &HandlerCtx<'_>| Ok(bump(ctx)),
                )),
        )
        .expect("register audit");
    store
        .register(
            Epic::new("shadow")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(
                    [Condition::new("audit")],
                    |_: &ConditionValues, ctx: &HandlerCtx<'_>| Ok(bump(ctx)),
                )),
        )
        .expect("register shadow");

    store.dispatch("user.login").expect("dispatch");

    assert_eq!(store.epic_state("audit"), Some(json!({"counter": 1})));
    assert_eq!(store.epic_state("shadow"), Some(json!({"counter": 1})));
}

#[test]
fn wildcard_matching_is_anchored() {
    let mut store = Store::builder().debug(true).patterns(true).build();
    store
        .register(
            Epic::new("audit")
                .with_state(json!({"counter": 0}))
                .add_updater(Updater::new(
                    ["user.*"],
                    |_: &ConditionValues, ctx: &HandlerCtx<'_>| Ok(bump(ctx)),
                )),
        )
        .expect("register audit");

    store.dispatch("user.login").expect("matching");
    store.dispatch("auser.login").expect("prefixed");
    store.dispatch("userXlogin").expect("unseparated");

    assert_eq!(store.epic_state("audit"), Some(json!({"counter": 1})));
}

#[test]
fn direct_updaters_fire_before_pattern_updaters() {
    use std::cell::RefCell;
    use std::rc::Rc;

    let mut store = Store::builder().patterns(true).build();
    let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

    let wild = Rc::clone(&log);
    store
        .register(Epic::new("wild").add_updater(Updater::new(
            ["ev*"],
            move |_: &ConditionValues, _: &HandlerCtx<'_>| {
                wild.borrow_mut().push("pattern");
                Ok(HandlerOutput::new().with_state(json!({"seen": true})))
            },
        )))
        .expect("register wild");
    let exact = Rc::clone(&log);
    store
        .register(Epic::new("exact").add_updater(Updater::new(
            ["event"],
            move |_: &ConditionValues, _: &HandlerCtx<'_>| {
                exact.borrow_mut().push("direct");
                Ok(HandlerOutput::new().with_state(json!({"seen": true})))
            },
        )))
        .expect("register exact");

    store.dispatch("event").expect("dispatch");

    assert_eq!(*log.borrow(), vec!["direct", "pattern"]);
}

#[test]
fn wildcard_condition_requires_pattern_support() {
    let mut store = Store::builder().build();
    let err = store
        .register(Epic::new("sink").add_updater(Updater::new(
            ["*"],
            |_: &ConditionValues, _: &HandlerCtx<'_>| Ok(HandlerOutput::new()),
        )))
        .expect_err("patterns disabled");
    assert!(matches!(err, StoreError::InvalidConditionType { .. }));
    // Failed registration leaves nothing behind.
    assert!(store.register(Epic::new("sink").add_updater(counter_updater())).is_ok());
}

#[test]
fn selector_on_wildcard_condition_is_rejected() {
    let mut store = Store::builder().patterns(true).build();
    let err = store
        .register(Epic::new("sink").add_updater(Updater::new(
            [Condition::new("user.*").select(|payload, _| payload.clone())],
            |_: &ConditionValues, _: &HandlerCtx<'_>| Ok(HandlerOutput::new()),
        )))
        .expect_err("selector on wildcard");
    assert!(matches!(err, StoreError::InvalidConditionSelector { .. }));
}
