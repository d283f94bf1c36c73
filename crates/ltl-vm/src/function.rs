//! Native function storage.
//!
//! Every callable value in the VM is a native function: a host closure
//! invoked with the VM itself, reading its arguments from the current
//! frame and returning how many results it left on top of the stack.

use std::fmt;
use std::rc::Rc;

use crate::error::ScriptError;
use crate::vm::Vm;

/// Trait for callable native functions.
///
/// Implemented for every `Fn(&mut Vm) -> Result<i32, ScriptError>`, so plain
/// functions and closures can be pushed directly.
pub trait NativeCallable {
    /// Run the function. Arguments occupy stack indices `1..=top`; the
    /// return value is the number of results pushed.
    fn call(&self, vm: &mut Vm) -> Result<i32, ScriptError>;
}

impl<F> NativeCallable for F
where
    F: Fn(&mut Vm) -> Result<i32, ScriptError>,
{
    fn call(&self, vm: &mut Vm) -> Result<i32, ScriptError> {
        (self)(vm)
    }
}

/// Type-erased native function.
///
/// The callable is reference counted so the VM can release its borrow of the
/// heap before invoking it.
#[derive(Clone)]
pub struct NativeFn {
    inner: Rc<dyn NativeCallable>,
}

impl NativeFn {
    pub fn new<F>(f: F) -> Self
    where
        F: NativeCallable + 'static,
    {
        Self { inner: Rc::new(f) }
    }

    pub fn call(&self, vm: &mut Vm) -> Result<i32, ScriptError> {
        self.inner.call(vm)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn").finish_non_exhaustive()
    }
}
