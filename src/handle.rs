//! Non-owning handles to stack slots.
//!
//! A handle is a session id plus an absolute stack index. It owns nothing
//! and is only meaningful while the frame it was taken from is alive; the
//! slot is re-inspected on every [`valid`](Ref::valid) call because the
//! stack can change between creation and use.

use ltl_vm::{Vm, VmId, VmType};

use crate::error::TypeError;
use crate::sandbox::{CheckArg, check};
use crate::stack_api;
use crate::stack_core::{
    CastPolicy, CastTrait, DefaultTag, GenericTag, NameTrait, PushPolicy, PushTrait, RefTag,
    TypeTrait, VmTyped, ZeroPolicy, ZeroTrait,
};

/// Behaviour shared by every handle kind.
pub trait StackRef: Sized {
    /// Build a handle from its parts. `None` yields an invalid handle.
    fn from_parts(vm: Option<VmId>, index: i32) -> Self;

    fn vm_id(&self) -> Option<VmId>;

    fn index(&self) -> i32;

    /// Detach the handle from its session so it no longer validates. The
    /// stack slot itself is left alone.
    fn invalidate(&mut self);

    /// Bound to `vm`, non-zero index, and the slot still exists.
    fn attached(&self, vm: &Vm) -> bool {
        self.vm_id() == Some(vm.id()) && self.index() != 0 && vm.is_valid_index(self.index())
    }
}

impl<H: StackRef> PushPolicy<H> for RefTag {
    fn push(vm: &mut Vm, value: H) {
        if value.vm_id() == Some(vm.id()) {
            vm.push_value(value.index());
        } else {
            vm.push_nil();
        }
    }
}

impl<H: StackRef> CastPolicy<H> for RefTag {
    fn cast(vm: &Vm, n: i32) -> H {
        H::from_parts(Some(vm.id()), vm.abs_index(n))
    }
}

impl<H: StackRef> ZeroPolicy<H> for RefTag {
    fn zero(_: &Vm, _: i32) -> H {
        H::from_parts(None, 0)
    }
}

// =============================================================================
// Ref
// =============================================================================

/// Handle to a slot of any type.
///
/// The generic handle type-checks against everything, including an empty
/// slot, and is the only handle offering [`is`](Ref::is), [`to`](Ref::to)
/// and [`get`](Ref::get).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ref {
    vm: Option<VmId>,
    index: i32,
}

impl Ref {
    /// Handle to slot `n` of `vm`, stored as an absolute index.
    pub fn new(vm: &Vm, n: i32) -> Self {
        stack_api::cast(vm, n)
    }

    pub fn valid(&self, vm: &Vm) -> bool {
        self.attached(vm)
    }

    /// Does the referenced slot type-check as `T`?
    pub fn is<T: TypeTrait + ?Sized>(&self, vm: &Vm) -> bool {
        stack_api::is_type::<T>(vm, self.index)
    }

    /// Unchecked read of the referenced slot.
    pub fn to<T: CastTrait>(&self, vm: &Vm) -> T {
        stack_api::cast(vm, self.index)
    }

    /// Checked read of the referenced slot.
    pub fn get<T: CheckArg>(&self, vm: &Vm) -> Result<T::Output, TypeError> {
        check::<T>(vm, self.index)
    }

    /// VM type of the referenced slot.
    pub fn vm_type(&self, vm: &Vm) -> VmType {
        vm.type_of(self.index)
    }
}

impl StackRef for Ref {
    fn from_parts(vm: Option<VmId>, index: i32) -> Self {
        Self { vm, index }
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

impl PushTrait for Ref {
    type Tag = RefTag;
}

impl CastTrait for Ref {
    type Tag = RefTag;
}

impl TypeTrait for Ref {
    type Tag = GenericTag;
}

impl ZeroTrait for Ref {
    type Tag = RefTag;
}

impl NameTrait for Ref {
    type Tag = GenericTag;
}

// =============================================================================
// Func
// =============================================================================

/// Handle to a function slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Func {
    vm: Option<VmId>,
    index: i32,
}

impl Func {
    pub fn valid(&self, vm: &Vm) -> bool {
        self.attached(vm) && stack_api::is_type::<Func>(vm, self.index)
    }
}

impl StackRef for Func {
    fn from_parts(vm: Option<VmId>, index: i32) -> Self {
        Self { vm, index }
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

impl VmTyped for Func {
    const VM_TYPE: VmType = VmType::Function;
}

impl PushTrait for Func {
    type Tag = RefTag;
}

impl CastTrait for Func {
    type Tag = RefTag;
}

impl TypeTrait for Func {
    type Tag = DefaultTag;
}

impl ZeroTrait for Func {
    type Tag = RefTag;
}

impl NameTrait for Func {
    type Tag = DefaultTag;
}
