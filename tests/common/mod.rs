//! Shared fixtures for the integration tests.
//!
//! There is no script compiler, so the helpers here perform by hand what a
//! one-line script would do: `Class.new(...)`, `obj:method(...)`, and
//! reading the native value behind a global.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use ltl::prelude::*;
use ltl_vm::Value;

/// Records lifecycle events observed by native objects.
#[derive(Clone, Default)]
pub struct EventTracker {
    events: Rc<RefCell<Vec<String>>>,
}

impl EventTracker {
    pub fn add(&self, what: &str) {
        self.events.borrow_mut().push(what.to_string());
    }

    pub fn has(&self, what: &str) -> bool {
        self.count(what) > 0
    }

    pub fn count(&self, what: &str) -> usize {
        self.events.borrow().iter().filter(|e| *e == what).count()
    }
}

pub struct UserType {
    pub x: i32,
    pub y: i32,
    pub events: Option<EventTracker>,
}

impl UserType {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y, events: None }
    }

    pub fn splat(t: i32) -> Self {
        Self::new(t, t)
    }

    pub fn sum(&self) -> i32 {
        self.x + self.y
    }

    pub fn set(&mut self, x: i32, y: i32) {
        self.x = x;
        self.y = y;
    }

    pub fn ordered(&self, reverse: bool) -> bool {
        if reverse {
            self.x >= self.y
        } else {
            self.x <= self.y
        }
    }
}

impl Drop for UserType {
    fn drop(&mut self) {
        if let Some(events) = &self.events {
            events.add("dtor called");
        }
    }
}

impl NativeType for UserType {}

/// `Class.new(args...)`. On success the instance is on top of the stack, on
/// failure the error message is.
pub fn construct(vm: &mut Vm, class: &str, args: &[Value]) -> Result<(), ScriptError> {
    vm.get_global(class);
    if let Err(err) = vm.get_field(-1, "new") {
        vm.pop(1);
        return Err(err);
    }
    vm.remove(-2);
    for arg in args {
        vm.push(arg.clone());
    }
    vm.pcall(args.len(), 1)
}

/// `global = Class.new(args...)`, leaving the stack as it was.
pub fn construct_global(
    vm: &mut Vm,
    global: &str,
    class: &str,
    args: &[Value],
) -> Result<(), ScriptError> {
    let top = vm.top();
    let result = construct(vm, class, args);
    if result.is_ok() {
        vm.set_global(global);
    }
    vm.set_top(top);
    result
}

/// `obj:method(args...)` for the object at `obj`, keeping one result (or the
/// error message) on top.
pub fn invoke(vm: &mut Vm, obj: i32, method: &str, args: &[Value]) -> Result<(), ScriptError> {
    let obj = vm.abs_index(obj);
    vm.get_field(obj, method)?;
    vm.push_value(obj);
    for arg in args {
        vm.push(arg.clone());
    }
    vm.pcall(args.len() + 1, 1)
}

/// `Table.func(args...)`, keeping one result (or the error message) on top.
pub fn call_field(vm: &mut Vm, table: &str, func: &str, args: &[Value]) -> Result<(), ScriptError> {
    vm.get_global(table);
    if let Err(err) = vm.get_field(-1, func) {
        vm.pop(1);
        return Err(err);
    }
    vm.remove(-2);
    for arg in args {
        vm.push(arg.clone());
    }
    vm.pcall(args.len(), 1)
}

/// Handle to the registered object stored in `global`, pushed on the stack.
pub fn fetch_userdata<C: NativeType>(vm: &mut Vm, global: &str) -> Userdata<C> {
    assert_eq!(vm.get_global(global), VmType::Userdata);
    check::<C>(vm, -1).unwrap()
}

/// Error message left on top of the stack by a failed protected call.
pub fn error_message(vm: &Vm) -> String {
    vm.to_string(-1).map(|s| s.to_string()).unwrap_or_default()
}

pub fn int(i: i64) -> Value {
    Value::Integer(i)
}

pub fn text(s: &str) -> Value {
    Value::from(s)
}
