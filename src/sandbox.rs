//! Checked extraction of arguments.
//!
//! [`check`] is the only extraction path trampolines use: it type-checks the
//! slot and either casts it or fails with a [`TypeError`] naming both the
//! expected and the actual type. Registered classes are checked through
//! their handle, so `check::<Point>` yields a `Userdata<Point>` viewing the
//! VM-owned box rather than a copy of the object.

use std::ffi::CString;

use ltl_vm::Vm;

use crate::error::TypeError;
use crate::handle::{Func, Ref};
use crate::stack_api;
use crate::stack_core::{CastTrait, NameTrait, TypeTrait};
use crate::userdata::{NativeType, Userdata};

/// Types that can be pulled off the stack with a type check.
pub trait CheckArg {
    /// What a successful check yields: the value itself for primitives and
    /// handles, a [`Userdata`] handle for registered classes.
    type Output;

    fn check(vm: &Vm, n: i32) -> Result<Self::Output, TypeError>;
}

/// Type-check slot `n` as `T` and read it.
#[inline]
pub fn check<T: CheckArg + ?Sized>(vm: &Vm, n: i32) -> Result<T::Output, TypeError> {
    T::check(vm, n)
}

fn check_basic<T>(vm: &Vm, n: i32) -> Result<T, TypeError>
where
    T: TypeTrait + CastTrait + NameTrait,
{
    if stack_api::is_type::<T>(vm, n) {
        Ok(stack_api::cast(vm, n))
    } else {
        Err(TypeError::new(
            stack_api::name::<T>(vm, n),
            vm.type_name_at(n),
        ))
    }
}

macro_rules! impl_check_basic {
    ($($ty:ty),*) => {
        $(
            impl CheckArg for $ty {
                type Output = $ty;

                fn check(vm: &Vm, n: i32) -> Result<$ty, TypeError> {
                    check_basic(vm, n)
                }
            }
        )*
    };
}

impl_check_basic!(
    i8, i16, i32, i64, isize, u8, u16, u32, f32, f64, bool, String, CString, Ref, Func
);

impl<T> CheckArg for *mut T {
    type Output = *mut T;

    fn check(vm: &Vm, n: i32) -> Result<*mut T, TypeError> {
        check_basic(vm, n)
    }
}

impl<T> CheckArg for *const T {
    type Output = *const T;

    fn check(vm: &Vm, n: i32) -> Result<*const T, TypeError> {
        check_basic(vm, n)
    }
}

impl<C: NativeType> CheckArg for Userdata<C> {
    type Output = Userdata<C>;

    fn check(vm: &Vm, n: i32) -> Result<Userdata<C>, TypeError> {
        check_basic(vm, n)
    }
}

impl<C: NativeType> CheckArg for C {
    type Output = Userdata<C>;

    fn check(vm: &Vm, n: i32) -> Result<Userdata<C>, TypeError> {
        check_basic::<Userdata<C>>(vm, n)
    }
}

/// Capability context handed to sandboxed constructors.
///
/// It grants checked, read-only access to the constructor's arguments and
/// nothing else: no stack mutation, no globals, no allocation.
pub struct Sandbox<'vm> {
    vm: &'vm Vm,
}

impl<'vm> Sandbox<'vm> {
    pub(crate) fn new(vm: &'vm Vm) -> Self {
        Self { vm }
    }

    /// Number of arguments passed to the constructor.
    pub fn arg_count(&self) -> usize {
        self.vm.top().max(0) as usize
    }

    /// Argument `n` (1-based), type-checked as `T`.
    pub fn arg<T: CheckArg>(&self, n: i32) -> Result<T::Output, TypeError> {
        check::<T>(self.vm, n)
    }

    /// Argument `n` if it is present and type-checks as `T`.
    pub fn opt<T: CheckArg>(&self, n: i32) -> Option<T::Output> {
        check::<T>(self.vm, n).ok()
    }
}
