//! Windows over a contiguous range of stack slots.
//!
//! A view is fixed at construction: pushing or popping afterwards does not
//! move its bounds, so handles taken through it keep pointing at the slots
//! that were there when the view was made.

use ltl_vm::{Vm, VmId};

use crate::handle::{Ref, StackRef};
use crate::util;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackView {
    vm: VmId,
    bottom: i32,
    top: i32,
}

impl StackView {
    /// The whole current frame.
    pub fn new(vm: &Vm) -> Self {
        Self {
            vm: vm.id(),
            bottom: 1,
            top: vm.top(),
        }
    }

    /// Slots from `bottom` up to the current top.
    pub fn with_bottom(vm: &Vm, bottom: i32) -> Self {
        Self::with_range(vm, bottom, -1)
    }

    /// Slots `bottom..=top`, both resolved against the current frame.
    pub fn with_range(vm: &Vm, bottom: i32, top: i32) -> Self {
        Self {
            vm: vm.id(),
            bottom: vm.abs_index(bottom).max(1),
            top: vm.abs_index(top),
        }
    }

    pub fn bottom(&self) -> i32 {
        self.bottom
    }

    pub fn top(&self) -> i32 {
        self.top
    }

    pub fn size(&self) -> i32 {
        (self.top - self.bottom + 1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Handle to slot `n` of the view: positive from the bottom, negative
    /// from the top.
    pub fn at(&self, n: i32) -> Ref {
        Ref::from_parts(Some(self.vm), util::abs_index(n, self.bottom, self.top))
    }

    pub fn iter(&self) -> impl Iterator<Item = Ref> + '_ {
        (1..=self.size()).map(|n| self.at(n))
    }
}
