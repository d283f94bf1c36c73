//! Boxed native instances owned by the VM.
//!
//! A native object handed to scripts lives inside a full userdata as an
//! [`Instance`]. The VM decides when the box dies; the class finalizer then
//! moves the instance to [`InstanceState::Finalized`], dropping the native
//! value exactly once.
//!
//! Registered class names are kept per session in a [`TypeRegistry`]
//! attached to the VM, so two sessions may expose the same Rust type under
//! different names.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use ltl_vm::{Vm, VmId, VmType};
use rustc_hash::FxHashMap;

use crate::error::{BridgeError, LifecycleError};
use crate::handle::StackRef;
use crate::stack_api;
use crate::stack_core::{
    CastTrait, NamePolicy, NameTrait, PushTrait, RefTag, TypePolicy, TypeTrait, UserdataTag,
    VmTyped, ZeroTrait,
};

/// Marker for Rust types that can be exposed to scripts as classes.
///
/// # Example
///
/// ```
/// use ltl::NativeType;
///
/// struct Point { x: i32, y: i32 }
///
/// impl NativeType for Point {}
/// ```
pub trait NativeType: Any {}

// =============================================================================
// Type registry
// =============================================================================

/// Registered class names for one VM session.
///
/// Each name belongs to at most one native type, since the name keys the
/// metatable that instance checks compare against.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    names: FxHashMap<TypeId, Rc<str>>,
    owners: FxHashMap<Rc<str>, (TypeId, &'static str)>,
}

impl TypeRegistry {
    pub fn name_of<C: 'static>(&self) -> Option<Rc<str>> {
        self.names.get(&TypeId::of::<C>()).cloned()
    }

    pub fn is_registered<C: 'static>(&self) -> bool {
        self.names.contains_key(&TypeId::of::<C>())
    }

    /// Rust type name of the type registered under `name`.
    pub fn owner_of(&self, name: &str) -> Option<&'static str> {
        self.owners.get(name).map(|(_, type_name)| *type_name)
    }

    /// Whether `name` is held by a type other than `C`.
    pub fn is_taken_by_other<C: 'static>(&self, name: &str) -> bool {
        self.owners
            .get(name)
            .is_some_and(|(id, _)| *id != TypeId::of::<C>())
    }

    fn set_name<C: 'static>(&mut self, name: &str) {
        let name: Rc<str> = Rc::from(name);
        if let Some(previous) = self.names.insert(TypeId::of::<C>(), Rc::clone(&name)) {
            self.owners.remove(&previous);
        }
        self.owners
            .insert(name, (TypeId::of::<C>(), std::any::type_name::<C>()));
    }
}

/// Name `C` was registered under in this session.
pub fn registered_name<C: 'static>(vm: &Vm) -> Option<Rc<str>> {
    vm.app_data::<TypeRegistry>()?.name_of::<C>()
}

pub(crate) fn set_registered_name<C: 'static>(vm: &mut Vm, name: &str) {
    vm.app_data_or_default::<TypeRegistry>().set_name::<C>(name);
}

// =============================================================================
// Instance state machine
// =============================================================================

/// Observable state of a boxed instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Allocated but not yet holding a value
    Empty,
    /// Holding a live native value
    Owned,
    /// The native value has been released
    Finalized,
}

/// The payload stored inside a class userdata.
///
/// Transitions: `Empty -> Owned -> Finalized`, or `Empty -> Finalized`.
/// Nothing leaves `Finalized`.
pub enum Instance<C> {
    Empty,
    Owned(Box<C>),
    Finalized,
}

impl<C> Instance<C> {
    pub fn state(&self) -> InstanceState {
        match self {
            Instance::Empty => InstanceState::Empty,
            Instance::Owned(_) => InstanceState::Owned,
            Instance::Finalized => InstanceState::Finalized,
        }
    }

    /// Store a value into an empty box.
    pub fn set(&mut self, value: C) -> Result<(), LifecycleError> {
        match self {
            Instance::Empty => {
                *self = Instance::Owned(Box::new(value));
                Ok(())
            }
            Instance::Owned(_) => Err(LifecycleError::AlreadyOwned),
            Instance::Finalized => Err(LifecycleError::AlreadyFinalized),
        }
    }

    pub fn get(&self) -> Result<&C, LifecycleError> {
        match self {
            Instance::Owned(value) => Ok(value),
            Instance::Empty => Err(LifecycleError::Empty),
            Instance::Finalized => Err(LifecycleError::AlreadyFinalized),
        }
    }

    pub fn get_mut(&mut self) -> Result<&mut C, LifecycleError> {
        match self {
            Instance::Owned(value) => Ok(value),
            Instance::Empty => Err(LifecycleError::Empty),
            Instance::Finalized => Err(LifecycleError::AlreadyFinalized),
        }
    }

    /// Move to `Finalized`, handing back the native value if there was one.
    /// A second call fails with [`LifecycleError::AlreadyFinalized`].
    pub fn finalize(&mut self) -> Result<Option<C>, LifecycleError> {
        match std::mem::replace(self, Instance::Finalized) {
            Instance::Owned(value) => Ok(Some(*value)),
            Instance::Empty => Ok(None),
            Instance::Finalized => Err(LifecycleError::AlreadyFinalized),
        }
    }
}

impl<C> fmt::Debug for Instance<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Instance").field(&self.state()).finish()
    }
}

// =============================================================================
// Userdata handle
// =============================================================================

/// Handle to a stack slot holding a boxed `C`.
///
/// Valid only while the slot holds a userdata whose metatable is the very
/// table registered for `C`. Metatables are compared by identity, so a
/// foreign table registered under a colliding name does not pass.
pub struct Userdata<C> {
    vm: Option<VmId>,
    index: i32,
    _marker: PhantomData<fn() -> C>,
}

impl<C> Clone for Userdata<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for Userdata<C> {}

impl<C> Default for Userdata<C> {
    fn default() -> Self {
        Self::from_parts(None, 0)
    }
}

impl<C> fmt::Debug for Userdata<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Userdata")
            .field("type", &type_name::<C>())
            .field("vm", &self.vm)
            .field("index", &self.index)
            .finish()
    }
}

impl<C> StackRef for Userdata<C> {
    fn from_parts(vm: Option<VmId>, index: i32) -> Self {
        Self {
            vm,
            index,
            _marker: PhantomData,
        }
    }

    fn vm_id(&self) -> Option<VmId> {
        self.vm
    }

    fn index(&self) -> i32 {
        self.index
    }

    fn invalidate(&mut self) {
        self.vm = None;
    }
}

impl<C: NativeType> Userdata<C> {
    pub fn valid(&self, vm: &Vm) -> bool {
        self.attached(vm) && stack_api::is_type::<Self>(vm, self.index)
    }

    fn instance<'v>(&self, vm: &'v Vm) -> Result<&'v Instance<C>, BridgeError> {
        if !self.valid(vm) {
            return Err(self.invalid());
        }
        vm.userdata::<Instance<C>>(self.index)
            .ok_or_else(|| self.invalid())
    }

    fn instance_mut<'v>(&self, vm: &'v mut Vm) -> Result<&'v mut Instance<C>, BridgeError> {
        if !self.valid(vm) {
            return Err(self.invalid());
        }
        let invalid = self.invalid();
        vm.userdata_mut::<Instance<C>>(self.index).ok_or(invalid)
    }

    fn invalid(&self) -> BridgeError {
        BridgeError::invalid_handle(format!(
            "{} at index {}",
            type_name::<C>(),
            self.index
        ))
    }

    /// Borrow the native value. Fails for an invalid handle, an empty box,
    /// or an instance that has already been finalized.
    pub fn get<'v>(&self, vm: &'v Vm) -> Result<&'v C, BridgeError> {
        Ok(self.instance(vm)?.get()?)
    }

    pub fn get_mut<'v>(&self, vm: &'v mut Vm) -> Result<&'v mut C, BridgeError> {
        Ok(self.instance_mut(vm)?.get_mut()?)
    }

    pub fn state(&self, vm: &Vm) -> Result<InstanceState, BridgeError> {
        Ok(self.instance(vm)?.state())
    }

    /// Fill an empty box.
    pub fn set(&self, vm: &mut Vm, value: C) -> Result<(), BridgeError> {
        Ok(self.instance_mut(vm)?.set(value)?)
    }

    /// Release the native value now instead of waiting for the collector.
    pub fn finalize(&self, vm: &mut Vm) -> Result<Option<C>, BridgeError> {
        Ok(self.instance_mut(vm)?.finalize()?)
    }
}

impl<C: NativeType> TypePolicy<Userdata<C>> for UserdataTag {
    fn is_type(vm: &Vm, n: i32) -> bool {
        if vm.type_of(n) != VmType::Userdata {
            return false;
        }
        let Some(name) = registered_name::<C>(vm) else {
            return false;
        };
        match (vm.named_metatable(&name), vm.metatable_of(n)) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl<C: NativeType> NamePolicy<Userdata<C>> for UserdataTag {
    fn name(vm: &Vm, _: i32) -> String {
        match registered_name::<C>(vm) {
            Some(name) => format!("Userdata<{}>", name),
            None => format!("Userdata<{}>", type_name::<C>()),
        }
    }
}

impl<C> VmTyped for Userdata<C> {
    const VM_TYPE: VmType = VmType::Userdata;
}

impl<C> PushTrait for Userdata<C> {
    type Tag = RefTag;
}

impl<C> CastTrait for Userdata<C> {
    type Tag = RefTag;
}

impl<C: NativeType> TypeTrait for Userdata<C> {
    type Tag = UserdataTag;
}

impl<C> ZeroTrait for Userdata<C> {
    type Tag = RefTag;
}

impl<C: NativeType> NameTrait for Userdata<C> {
    type Tag = UserdataTag;
}

// =============================================================================
// Allocation
// =============================================================================

fn push_instance<C: NativeType>(
    vm: &mut Vm,
    instance: Instance<C>,
) -> Result<Userdata<C>, BridgeError> {
    let name = registered_name::<C>(vm).ok_or(BridgeError::Unregistered {
        type_name: type_name::<C>(),
    })?;
    vm.new_userdata(instance);
    if vm.get_named_metatable(&name) != VmType::Table {
        vm.pop(2);
        return Err(BridgeError::Unregistered {
            type_name: type_name::<C>(),
        });
    }
    vm.set_metatable(-2)?;
    Ok(stack_api::cast(vm, -1))
}

/// Box `value` as a new instance of its registered class and push it.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn create_userdata<C: NativeType>(vm: &mut Vm, value: C) -> Result<Userdata<C>, BridgeError> {
    push_instance(vm, Instance::Owned(Box::new(value)))
}

/// Push an empty instance of `C`'s registered class, to be filled later
/// with [`Userdata::set`].
pub fn allocate_userdata<C: NativeType>(vm: &mut Vm) -> Result<Userdata<C>, BridgeError> {
    push_instance(vm, Instance::<C>::Empty)
}
