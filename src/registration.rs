//! Exposing native classes and free functions to scripts.
//!
//! [`register_class`] opens a class: it records the class name for the
//! session, creates (or reuses) a global method table of that name, creates
//! the class metatable and installs the finalizer. Constructors, methods
//! and static functions are then added to the method table. Closing the
//! registrar links the two tables: the metatable's `__index` points at the
//! method table, and `__metatable` hides the real metatable from scripts.
//!
//! ```
//! use ltl::{NativeType, register_class};
//! use ltl_vm::Vm;
//!
//! struct Point { x: i32, y: i32 }
//! impl NativeType for Point {}
//!
//! let mut vm = Vm::new();
//! register_class::<Point>(&mut vm, "Point")
//!     .add_ctor(|x: i32, y: i32| Point { x, y })
//!     .add_function("sum", |p: &Point| p.x + p.y)
//!     .add_function("shift", |p: &mut Point, dx: i32| p.x += dx)
//!     .finish()
//!     .unwrap();
//! ```
//!
//! Every trampoline checks the receiver first, then the arguments left to
//! right, and only then touches native code. A failed check surfaces as a
//! script error and no native call happens.

use std::fmt;
use std::marker::PhantomData;

use ltl_vm::{NativeFn, ScriptError, Vm, VmType};

use crate::error::{BridgeError, LifecycleError};
use crate::sandbox::{CheckArg, Sandbox, check};
use crate::stack_api;
use crate::stack_core::PushTrait;
use crate::userdata::{
    NativeType, TypeRegistry, Userdata, create_userdata, set_registered_name,
};

// =============================================================================
// Results
// =============================================================================

/// Values a native function can hand back to the VM.
///
/// `()` yields no results, anything pushable yields what it pushes, and
/// `Err` of a `Result` becomes a script error.
pub trait IntoResults {
    /// Push the results and return how many were pushed.
    fn into_results(self, vm: &mut Vm) -> Result<i32, ScriptError>;
}

impl IntoResults for () {
    fn into_results(self, _: &mut Vm) -> Result<i32, ScriptError> {
        Ok(0)
    }
}

impl<T: PushTrait> IntoResults for T {
    fn into_results(self, vm: &mut Vm) -> Result<i32, ScriptError> {
        let before = vm.top();
        stack_api::push(vm, self);
        Ok(vm.top() - before)
    }
}

impl<R: IntoResults, E: fmt::Display> IntoResults for Result<R, E> {
    fn into_results(self, vm: &mut Vm) -> Result<i32, ScriptError> {
        match self {
            Ok(value) => value.into_results(vm),
            Err(err) => Err(ScriptError::Runtime(err.to_string())),
        }
    }
}

/// Return a fresh instance of a registered class from a native function.
#[derive(Debug)]
pub struct NewInstance<C>(pub C);

impl<C: NativeType> IntoResults for NewInstance<C> {
    fn into_results(self, vm: &mut Vm) -> Result<i32, ScriptError> {
        create_userdata(vm, self.0)?;
        Ok(1)
    }
}

// =============================================================================
// Argument appliers
// =============================================================================

/// Receiver markers distinguishing `&mut C` and `&C` methods.
#[doc(hidden)]
pub struct MutReceiver;

#[doc(hidden)]
pub struct RefReceiver;

/// Closures usable as free or static functions.
///
/// Implemented for `Fn(A1, .., An) -> R` with up to eight arguments, where
/// every argument checks to itself and `R: IntoResults`.
pub trait IntoFunction<Marker>: 'static {
    fn into_native_fn(self) -> NativeFn;
}

/// Closures usable as constructors of `C`.
pub trait IntoCtor<C, Marker>: 'static {
    fn into_native_fn(self) -> NativeFn;
}

/// Closures usable as methods of `C`, taking `&mut C` or `&C` first.
pub trait IntoMethod<C, Marker>: 'static {
    fn into_native_fn(self) -> NativeFn;
}

macro_rules! impl_appliers {
    ($($arg:ident $var:ident),*) => {
        impl<F, R, $($arg,)*> IntoFunction<fn($($arg,)*) -> R> for F
        where
            F: Fn($($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: CheckArg<Output = $arg>,)*
        {
            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_native_fn(self) -> NativeFn {
                let f = self;
                NativeFn::new(move |vm: &mut Vm| -> Result<i32, ScriptError> {
                    let mut n = 0;
                    $( n += 1; let $var = check::<$arg>(vm, n)?; )*
                    f($($var),*).into_results(vm)
                })
            }
        }

        impl<C, F, $($arg,)*> IntoCtor<C, fn($($arg,)*) -> C> for F
        where
            C: NativeType,
            F: Fn($($arg),*) -> C + 'static,
            $($arg: CheckArg<Output = $arg>,)*
        {
            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_native_fn(self) -> NativeFn {
                let f = self;
                NativeFn::new(move |vm: &mut Vm| -> Result<i32, ScriptError> {
                    #[cfg(feature = "profiling")]
                    profiling::scope!("ltl::ctor");
                    let mut n = 0;
                    $( n += 1; let $var = check::<$arg>(vm, n)?; )*
                    create_userdata(vm, f($($var),*))?;
                    Ok(1)
                })
            }
        }

        impl<C, F, R, $($arg,)*> IntoMethod<C, (MutReceiver, fn($($arg,)*) -> R)> for F
        where
            C: NativeType,
            F: Fn(&mut C, $($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: CheckArg<Output = $arg>,)*
        {
            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_native_fn(self) -> NativeFn {
                let f = self;
                NativeFn::new(move |vm: &mut Vm| -> Result<i32, ScriptError> {
                    #[cfg(feature = "profiling")]
                    profiling::scope!("ltl::method");
                    let this = check::<C>(vm, 1)?;
                    let mut n = 1;
                    $( n += 1; let $var = check::<$arg>(vm, n)?; )*
                    let out = f(this.get_mut(vm)?, $($var),*);
                    out.into_results(vm)
                })
            }
        }

        impl<C, F, R, $($arg,)*> IntoMethod<C, (RefReceiver, fn($($arg,)*) -> R)> for F
        where
            C: NativeType,
            F: Fn(&C, $($arg),*) -> R + 'static,
            R: IntoResults,
            $($arg: CheckArg<Output = $arg>,)*
        {
            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_native_fn(self) -> NativeFn {
                let f = self;
                NativeFn::new(move |vm: &mut Vm| -> Result<i32, ScriptError> {
                    #[cfg(feature = "profiling")]
                    profiling::scope!("ltl::method");
                    let this = check::<C>(vm, 1)?;
                    let mut n = 1;
                    $( n += 1; let $var = check::<$arg>(vm, n)?; )*
                    let out = f(this.get(vm)?, $($var),*);
                    out.into_results(vm)
                })
            }
        }
    };
}

impl_appliers!();
impl_appliers!(A1 a1);
impl_appliers!(A1 a1, A2 a2);
impl_appliers!(A1 a1, A2 a2, A3 a3);
impl_appliers!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_appliers!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_appliers!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_appliers!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_appliers!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

/// `__gc` for every registered class. Running it twice is harmless.
fn finalize_instance<C: NativeType>(vm: &mut Vm) -> Result<i32, ScriptError> {
    let handle = check::<Userdata<C>>(vm, 1)?;
    match handle.finalize(vm) {
        Ok(_) | Err(BridgeError::Lifecycle(LifecycleError::AlreadyFinalized)) => Ok(0),
        Err(err) => Err(err.into()),
    }
}

// =============================================================================
// Registrars
// =============================================================================

/// Push the global table `name`, creating it if the global is not a table.
/// Returns its absolute index.
fn open_library_table(vm: &mut Vm, name: &str) -> i32 {
    if vm.get_global(name) != VmType::Table {
        vm.pop(1);
        vm.new_table();
        vm.push_value(-1);
        vm.set_global(name);
    }
    vm.top()
}

/// Shared state of both registrar kinds.
struct Tables<'vm> {
    vm: &'vm mut Vm,
    /// Table receiving functions
    target: i32,
    error: Option<BridgeError>,
    closed: bool,
}

impl<'vm> Tables<'vm> {
    fn install(&mut self, table: i32, name: &str, func: NativeFn) {
        if self.closed {
            self.error.get_or_insert_with(|| {
                BridgeError::Script(ScriptError::runtime(format!(
                    "cannot add '{}' to a closed registrar",
                    name
                )))
            });
            return;
        }
        self.vm.push_native_fn(func, 0);
        if let Err(err) = self.vm.set_field(table, name) {
            self.error.get_or_insert(err.into());
        }
    }

    fn fail_on(&mut self, result: Result<(), ScriptError>) {
        if let Err(err) = result {
            self.error.get_or_insert(err.into());
        }
    }
}

/// Builder for a class exposed to scripts.
///
/// Closes automatically when dropped. Call [`finish`](Self::finish) to close
/// explicitly and observe any error recorded while registering.
pub struct ClassRegistrar<'vm, C: NativeType> {
    tables: Tables<'vm>,
    name: String,
    meta: i32,
    _marker: PhantomData<fn() -> C>,
}

/// Open registration of `C` under `name`.
///
/// If another native type already holds `name`, nothing is installed and
/// closing the registrar reports [`BridgeError::NameTaken`].
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn register_class<'vm, C: NativeType>(vm: &'vm mut Vm, name: &str) -> ClassRegistrar<'vm, C> {
    let owner = vm
        .app_data::<TypeRegistry>()
        .filter(|registry| registry.is_taken_by_other::<C>(name))
        .and_then(|registry| registry.owner_of(name));
    if let Some(owner) = owner {
        return ClassRegistrar {
            tables: Tables {
                vm,
                target: 0,
                error: Some(BridgeError::NameTaken {
                    name: name.to_string(),
                    owner: owner.to_string(),
                }),
                closed: true,
            },
            name: name.to_string(),
            meta: 0,
            _marker: PhantomData,
        };
    }

    set_registered_name::<C>(vm, name);
    let methods = open_library_table(vm, name);
    vm.new_metatable(name);
    let meta = vm.top();

    let mut registrar = ClassRegistrar {
        tables: Tables {
            vm,
            target: methods,
            error: None,
            closed: false,
        },
        name: name.to_string(),
        meta,
        _marker: PhantomData,
    };
    registrar
        .tables
        .install(meta, "__gc", NativeFn::new(finalize_instance::<C>));
    registrar
}

impl<'vm, C: NativeType> ClassRegistrar<'vm, C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.tables.closed
    }

    /// Install `new`, built from a typed closure. Arguments are checked left
    /// to right before the closure runs. Replaces any previous constructor.
    pub fn add_ctor<F, M>(mut self, ctor: F) -> Self
    where
        F: IntoCtor<C, M>,
    {
        let target = self.tables.target;
        self.tables.install(target, "new", ctor.into_native_fn());
        self
    }

    /// Install `new` as a raw native function that manages the stack
    /// itself, typically ending with [`create_userdata`].
    pub fn add_ctor_raw<F>(mut self, ctor: F) -> Self
    where
        F: Fn(&mut Vm) -> Result<i32, ScriptError> + 'static,
    {
        let target = self.tables.target;
        self.tables.install(target, "new", NativeFn::new(ctor));
        self
    }

    /// Install `new` as a constructor that only sees its arguments through
    /// a [`Sandbox`].
    pub fn add_ctor_sandboxed<F>(mut self, ctor: F) -> Self
    where
        F: Fn(&Sandbox<'_>) -> Result<C, BridgeError> + 'static,
    {
        let target = self.tables.target;
        let func = NativeFn::new(move |vm: &mut Vm| -> Result<i32, ScriptError> {
            let value = ctor(&Sandbox::new(vm))?;
            create_userdata(vm, value)?;
            Ok(1)
        });
        self.tables.install(target, "new", func);
        self
    }

    /// Install a method. The receiver is argument 1, so scripts call it as
    /// `obj:name(...)`.
    pub fn add_function<F, M>(mut self, name: &str, method: F) -> Self
    where
        F: IntoMethod<C, M>,
    {
        let target = self.tables.target;
        self.tables.install(target, name, method.into_native_fn());
        self
    }

    /// Install a function in the method table that takes no receiver, called
    /// as `Class.name(...)`.
    pub fn add_static<F, M>(mut self, name: &str, func: F) -> Self
    where
        F: IntoFunction<M>,
    {
        let target = self.tables.target;
        self.tables.install(target, name, func.into_native_fn());
        self
    }

    /// Install a raw native function in the method table.
    pub fn add_raw<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&mut Vm) -> Result<i32, ScriptError> + 'static,
    {
        let target = self.tables.target;
        self.tables.install(target, name, NativeFn::new(func));
        self
    }

    /// Link the metatable to the method table and release both stack slots.
    /// Closing again does nothing. Returns the first error recorded during
    /// registration, if any.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn close(&mut self) -> Result<(), BridgeError> {
        if !self.tables.closed {
            self.tables.closed = true;
            let (methods, meta) = (self.tables.target, self.meta);
            for field in ["__index", "__metatable"] {
                self.tables.vm.push_value(methods);
                let result = self.tables.vm.set_field(meta, field);
                self.tables.fail_on(result);
            }
            self.tables.vm.remove(meta);
            self.tables.vm.remove(methods);
        }
        self.tables.error.take().map_or(Ok(()), Err)
    }

    pub fn finish(mut self) -> Result<(), BridgeError> {
        self.close()
    }
}

impl<C: NativeType> Drop for ClassRegistrar<'_, C> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Builder for a global table of free functions.
pub struct LibraryRegistrar<'vm> {
    tables: Tables<'vm>,
}

/// Open (or reopen) the global library table `name`.
pub fn register_library<'vm>(vm: &'vm mut Vm, name: &str) -> LibraryRegistrar<'vm> {
    let target = open_library_table(vm, name);
    LibraryRegistrar {
        tables: Tables {
            vm,
            target,
            error: None,
            closed: false,
        },
    }
}

impl<'vm> LibraryRegistrar<'vm> {
    pub fn add_function<F, M>(mut self, name: &str, func: F) -> Self
    where
        F: IntoFunction<M>,
    {
        let target = self.tables.target;
        self.tables.install(target, name, func.into_native_fn());
        self
    }

    pub fn add_raw<F>(mut self, name: &str, func: F) -> Self
    where
        F: Fn(&mut Vm) -> Result<i32, ScriptError> + 'static,
    {
        let target = self.tables.target;
        self.tables.install(target, name, NativeFn::new(func));
        self
    }

    pub fn close(&mut self) -> Result<(), BridgeError> {
        if !self.tables.closed {
            self.tables.closed = true;
            let target = self.tables.target;
            self.tables.vm.remove(target);
        }
        self.tables.error.take().map_or(Ok(()), Err)
    }

    pub fn finish(mut self) -> Result<(), BridgeError> {
        self.close()
    }
}

impl Drop for LibraryRegistrar<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
