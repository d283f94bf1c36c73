mod common;

use common::*;
use ltl::prelude::*;

fn register_tracked(vm: &mut Vm, events: &EventTracker) {
    let events = events.clone();
    register_class::<UserType>(vm, "UserType")
        .add_ctor(move |x: i32| UserType {
            x,
            y: x,
            events: Some(events.clone()),
        })
        .add_function("sum", |u: &UserType| u.sum())
        .finish()
        .unwrap();
}

/// `ut = nil` followed by a full collection.
fn release_global(vm: &mut Vm, global: &str) {
    vm.push_nil();
    vm.set_global(global);
    vm.set_top(0);
    vm.collect_garbage();
}

#[test]
fn test_reachable_instance_survives_collection() {
    let events = EventTracker::default();
    let mut vm = Vm::new();
    register_tracked(&mut vm, &events);

    construct_global(&mut vm, "ut", "UserType", &[int(1)]).unwrap();
    vm.collect_garbage();
    assert!(!events.has("dtor called"));

    let ut = fetch_userdata::<UserType>(&mut vm, "ut");
    assert_eq!(ut.get(&vm).unwrap().sum(), 2);
}

#[test]
fn test_dtor_runs_when_collected() {
    let events = EventTracker::default();
    let mut vm = Vm::new();
    register_tracked(&mut vm, &events);

    construct_global(&mut vm, "ut", "UserType", &[int(1)]).unwrap();
    release_global(&mut vm, "ut");
    assert!(events.has("dtor called"));
}

#[test]
fn test_dtor_runs_exactly_once() {
    let events = EventTracker::default();
    let mut vm = Vm::new();
    register_tracked(&mut vm, &events);
    vm.collect_garbage();
    let baseline = vm.live_objects();

    construct_global(&mut vm, "ut", "UserType", &[int(1)]).unwrap();
    release_global(&mut vm, "ut");
    vm.collect_garbage();
    vm.collect_garbage();

    assert_eq!(events.count("dtor called"), 1);
    assert_eq!(vm.live_objects(), baseline);
}

#[test]
fn test_explicit_finalize_then_collection() {
    let events = EventTracker::default();
    let mut vm = Vm::new();
    register_tracked(&mut vm, &events);

    construct_global(&mut vm, "ut", "UserType", &[int(1)]).unwrap();
    let ut = fetch_userdata::<UserType>(&mut vm, "ut");
    let released = ut.finalize(&mut vm).unwrap();
    assert!(released.is_some());
    drop(released);
    assert_eq!(events.count("dtor called"), 1);

    assert!(matches!(
        ut.finalize(&mut vm),
        Err(BridgeError::Lifecycle(LifecycleError::AlreadyFinalized))
    ));

    release_global(&mut vm, "ut");
    assert_eq!(events.count("dtor called"), 1);
}

#[test]
fn test_method_on_finalized_instance_fails() {
    let events = EventTracker::default();
    let mut vm = Vm::new();
    register_tracked(&mut vm, &events);

    construct(&mut vm, "UserType", &[int(3)]).unwrap();
    let obj = vm.top();
    let ut = check::<UserType>(&vm, obj).unwrap();
    drop(ut.finalize(&mut vm).unwrap());
    assert_eq!(ut.state(&vm).unwrap(), InstanceState::Finalized);

    let err = invoke(&mut vm, obj, "sum", &[]).unwrap_err();
    assert_eq!(err.to_string(), "instance has already been finalized");
}

#[test]
fn test_closing_the_session_finalizes_live_instances() {
    let events = EventTracker::default();
    let mut vm = Vm::new();
    register_tracked(&mut vm, &events);

    construct_global(&mut vm, "a", "UserType", &[int(1)]).unwrap();
    construct_global(&mut vm, "b", "UserType", &[int(2)]).unwrap();
    assert!(!events.has("dtor called"));

    drop(vm);
    assert_eq!(events.count("dtor called"), 2);
}

#[test]
fn test_allocated_box_is_filled_later() {
    let mut vm = Vm::new();
    register_class::<UserType>(&mut vm, "UserType")
        .add_function("sum", |u: &UserType| u.sum())
        .finish()
        .unwrap();

    let handle = allocate_userdata::<UserType>(&mut vm).unwrap();
    assert_eq!(handle.state(&vm).unwrap(), InstanceState::Empty);

    let obj = handle.index();
    let err = invoke(&mut vm, obj, "sum", &[]).unwrap_err();
    assert_eq!(err.to_string(), "instance holds no value");
    vm.pop(1);

    handle.set(&mut vm, UserType::new(4, 5)).unwrap();
    assert!(matches!(
        handle.set(&mut vm, UserType::new(0, 0)),
        Err(BridgeError::Lifecycle(LifecycleError::AlreadyOwned))
    ));
    invoke(&mut vm, obj, "sum", &[]).unwrap();
    assert_eq!(cast::<i32>(&vm, -1), 9);
}

#[test]
fn test_stale_handle_is_rejected() {
    let mut vm = Vm::new();
    register_class::<UserType>(&mut vm, "UserType")
        .add_ctor(UserType::splat)
        .finish()
        .unwrap();

    construct(&mut vm, "UserType", &[int(1)]).unwrap();
    let handle = check::<UserType>(&vm, -1).unwrap();
    assert!(handle.valid(&vm));

    vm.pop(1);
    assert!(!handle.valid(&vm));
    assert!(matches!(
        handle.get(&vm),
        Err(BridgeError::InvalidHandle(_))
    ));

    let other = Vm::new();
    assert!(!handle.valid(&other));
}
