//! Per-operation conversion traits, tags and policies.
//!
//! Every type that crosses the VM boundary selects one tag for each of five
//! operations:
//!
//! | trait        | policy         | operation                                  |
//! |--------------|----------------|--------------------------------------------|
//! | [`PushTrait`] | [`PushPolicy`] | write a value onto the stack               |
//! | [`CastTrait`] | [`CastPolicy`] | read a slot without checking its type      |
//! | [`TypeTrait`] | [`TypePolicy`] | does the slot hold something compatible?   |
//! | [`ZeroTrait`] | [`ZeroPolicy`] | canonical default, never reads the stack   |
//! | [`NameTrait`] | [`NamePolicy`] | diagnostic label for error messages        |
//!
//! Tags are zero-sized types. The tags chosen for one type can differ per
//! operation: `u32` pushes through [`IntegralTag`] but type-checks through
//! [`UnsignedTag`]. Supporting a new type means implementing the five trait
//! mappings for it; the dispatch functions in [`crate::stack_api`] never
//! change.

use std::ffi::{CString, c_void};

use ltl_vm::{Vm, VmType};

// =============================================================================
// Traits
// =============================================================================

pub trait PushTrait: Sized {
    type Tag: PushPolicy<Self>;
}

pub trait CastTrait: Sized {
    type Tag: CastPolicy<Self>;
}

pub trait TypeTrait {
    type Tag: TypePolicy<Self>;
}

pub trait ZeroTrait: Sized {
    type Tag: ZeroPolicy<Self>;
}

pub trait NameTrait {
    type Tag: NamePolicy<Self>;
}

/// The VM type a value of this type occupies. Consulted by [`DefaultTag`].
pub trait VmTyped {
    const VM_TYPE: VmType;
}

// =============================================================================
// Policies
// =============================================================================

pub trait PushPolicy<T> {
    fn push(vm: &mut Vm, value: T);
}

pub trait CastPolicy<T> {
    fn cast(vm: &Vm, n: i32) -> T;
}

pub trait TypePolicy<T: ?Sized> {
    fn is_type(vm: &Vm, n: i32) -> bool;
}

pub trait ZeroPolicy<T> {
    fn zero(vm: &Vm, n: i32) -> T;
}

pub trait NamePolicy<T: ?Sized> {
    fn name(vm: &Vm, n: i32) -> String;
}

// =============================================================================
// Tags
// =============================================================================

/// Floats: pushed and read as VM numbers.
pub struct FloatingPointTag;

/// Integers: pushed and read as VM integers (reads truncate), named
/// `"integer"`.
pub struct IntegralTag;

/// Unsigned integers: a number that is not negative, named `"unsigned"`.
pub struct UnsignedTag;

pub struct BooleanTag;

/// Owned strings. Interior NUL bytes survive the round trip.
pub struct StringTag;

/// NUL-terminated strings. Reads stop at the first NUL.
pub struct CStringTag;

/// Raw pointers, carried as light userdata.
pub struct PointerTag;

/// Stack handles: pushing copies the referenced slot, casting captures the
/// absolute index, zero is an invalid handle.
pub struct RefTag;

/// Any slot at all, including none. Used by the generic `Ref` handle.
pub struct GenericTag;

/// Registered native objects.
pub struct UserdataTag;

/// Several values pushed left to right.
pub struct MultiTag;

/// Fallback policies driven by [`VmTyped`] and [`Default`].
pub struct DefaultTag;

// =============================================================================
// Policy implementations
// =============================================================================

impl<T: VmTyped + ?Sized> TypePolicy<T> for DefaultTag {
    fn is_type(vm: &Vm, n: i32) -> bool {
        vm.type_of(n) == T::VM_TYPE
    }
}

impl<T: Default> ZeroPolicy<T> for DefaultTag {
    fn zero(_: &Vm, _: i32) -> T {
        T::default()
    }
}

impl<T: VmTyped + ?Sized> NamePolicy<T> for DefaultTag {
    fn name(_: &Vm, _: i32) -> String {
        T::VM_TYPE.name().to_string()
    }
}

impl<T: VmTyped + ?Sized> TypePolicy<T> for UnsignedTag {
    fn is_type(vm: &Vm, n: i32) -> bool {
        vm.type_of(n) == T::VM_TYPE && vm.to_integer(n) >= 0
    }
}

impl<T: ?Sized> NamePolicy<T> for UnsignedTag {
    fn name(_: &Vm, _: i32) -> String {
        "unsigned".to_string()
    }
}

impl<T: ?Sized> NamePolicy<T> for IntegralTag {
    fn name(_: &Vm, _: i32) -> String {
        "integer".to_string()
    }
}

impl<T: ?Sized> NamePolicy<T> for PointerTag {
    fn name(_: &Vm, _: i32) -> String {
        "pointer".to_string()
    }
}

impl<T: ?Sized> TypePolicy<T> for GenericTag {
    fn is_type(_: &Vm, _: i32) -> bool {
        true
    }
}

impl<T: ?Sized> NamePolicy<T> for GenericTag {
    fn name(vm: &Vm, n: i32) -> String {
        format!("Ref@{}", vm.abs_index(n))
    }
}

impl PushPolicy<bool> for BooleanTag {
    fn push(vm: &mut Vm, value: bool) {
        vm.push_boolean(value);
    }
}

impl CastPolicy<bool> for BooleanTag {
    fn cast(vm: &Vm, n: i32) -> bool {
        vm.to_boolean(n)
    }
}

impl PushPolicy<String> for StringTag {
    fn push(vm: &mut Vm, value: String) {
        vm.push_string(&value);
    }
}

impl<'a> PushPolicy<&'a str> for StringTag {
    fn push(vm: &mut Vm, value: &'a str) {
        vm.push_string(value);
    }
}

impl CastPolicy<String> for StringTag {
    fn cast(vm: &Vm, n: i32) -> String {
        vm.to_string(n).map(|s| s.to_string()).unwrap_or_default()
    }
}

impl ZeroPolicy<String> for StringTag {
    fn zero(_: &Vm, _: i32) -> String {
        String::new()
    }
}

impl ZeroPolicy<CString> for StringTag {
    fn zero(_: &Vm, _: i32) -> CString {
        CString::default()
    }
}

impl PushPolicy<CString> for CStringTag {
    fn push(vm: &mut Vm, value: CString) {
        vm.push_bytes(value.as_bytes());
    }
}

impl CastPolicy<CString> for CStringTag {
    fn cast(vm: &Vm, n: i32) -> CString {
        let Some(bytes) = vm.to_bytes(n) else {
            return CString::default();
        };
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
        CString::new(&bytes[..end]).unwrap_or_default()
    }
}

impl<T> PushPolicy<*mut T> for PointerTag {
    fn push(vm: &mut Vm, value: *mut T) {
        vm.push_light_userdata(value.cast::<c_void>());
    }
}

impl<T> PushPolicy<*const T> for PointerTag {
    fn push(vm: &mut Vm, value: *const T) {
        vm.push_light_userdata(value.cast_mut().cast::<c_void>());
    }
}

impl<T> CastPolicy<*mut T> for PointerTag {
    fn cast(vm: &Vm, n: i32) -> *mut T {
        vm.to_pointer(n).cast::<T>()
    }
}

impl<T> CastPolicy<*const T> for PointerTag {
    fn cast(vm: &Vm, n: i32) -> *const T {
        vm.to_pointer(n).cast_const().cast::<T>()
    }
}

impl<T> ZeroPolicy<*mut T> for PointerTag {
    fn zero(_: &Vm, _: i32) -> *mut T {
        std::ptr::null_mut()
    }
}

impl<T> ZeroPolicy<*const T> for PointerTag {
    fn zero(_: &Vm, _: i32) -> *const T {
        std::ptr::null()
    }
}

// =============================================================================
// Primitive mappings
// =============================================================================

macro_rules! impl_signed_int {
    ($($ty:ty),*) => {
        $(
            impl PushPolicy<$ty> for IntegralTag {
                fn push(vm: &mut Vm, value: $ty) {
                    vm.push_integer(value as i64);
                }
            }

            impl CastPolicy<$ty> for IntegralTag {
                fn cast(vm: &Vm, n: i32) -> $ty {
                    vm.to_integer(n) as $ty
                }
            }

            impl VmTyped for $ty {
                const VM_TYPE: VmType = VmType::Number;
            }

            impl PushTrait for $ty {
                type Tag = IntegralTag;
            }

            impl CastTrait for $ty {
                type Tag = IntegralTag;
            }

            impl TypeTrait for $ty {
                type Tag = DefaultTag;
            }

            impl ZeroTrait for $ty {
                type Tag = DefaultTag;
            }

            impl NameTrait for $ty {
                type Tag = IntegralTag;
            }
        )*
    };
}

impl_signed_int!(i8, i16, i32, i64, isize);

// Only unsigned types strictly narrower than the VM integer map; u64 and
// usize do not fit.
macro_rules! impl_unsigned_int {
    ($($ty:ty),*) => {
        $(
            impl PushPolicy<$ty> for IntegralTag {
                fn push(vm: &mut Vm, value: $ty) {
                    vm.push_integer(value as i64);
                }
            }

            impl CastPolicy<$ty> for IntegralTag {
                fn cast(vm: &Vm, n: i32) -> $ty {
                    vm.to_integer(n) as $ty
                }
            }

            impl VmTyped for $ty {
                const VM_TYPE: VmType = VmType::Number;
            }

            impl PushTrait for $ty {
                type Tag = IntegralTag;
            }

            impl CastTrait for $ty {
                type Tag = IntegralTag;
            }

            impl TypeTrait for $ty {
                type Tag = UnsignedTag;
            }

            impl ZeroTrait for $ty {
                type Tag = DefaultTag;
            }

            impl NameTrait for $ty {
                type Tag = UnsignedTag;
            }
        )*
    };
}

impl_unsigned_int!(u8, u16, u32);

macro_rules! impl_float {
    ($($ty:ty),*) => {
        $(
            impl PushPolicy<$ty> for FloatingPointTag {
                fn push(vm: &mut Vm, value: $ty) {
                    vm.push_number(value as f64);
                }
            }

            impl CastPolicy<$ty> for FloatingPointTag {
                fn cast(vm: &Vm, n: i32) -> $ty {
                    vm.to_number(n) as $ty
                }
            }

            impl VmTyped for $ty {
                const VM_TYPE: VmType = VmType::Number;
            }

            impl PushTrait for $ty {
                type Tag = FloatingPointTag;
            }

            impl CastTrait for $ty {
                type Tag = FloatingPointTag;
            }

            impl TypeTrait for $ty {
                type Tag = DefaultTag;
            }

            impl ZeroTrait for $ty {
                type Tag = DefaultTag;
            }

            impl NameTrait for $ty {
                type Tag = DefaultTag;
            }
        )*
    };
}

impl_float!(f32, f64);

impl VmTyped for bool {
    const VM_TYPE: VmType = VmType::Boolean;
}

impl PushTrait for bool {
    type Tag = BooleanTag;
}

impl CastTrait for bool {
    type Tag = BooleanTag;
}

impl TypeTrait for bool {
    type Tag = DefaultTag;
}

impl ZeroTrait for bool {
    type Tag = DefaultTag;
}

impl NameTrait for bool {
    type Tag = DefaultTag;
}

impl VmTyped for String {
    const VM_TYPE: VmType = VmType::String;
}

impl PushTrait for String {
    type Tag = StringTag;
}

impl CastTrait for String {
    type Tag = StringTag;
}

impl TypeTrait for String {
    type Tag = DefaultTag;
}

impl ZeroTrait for String {
    type Tag = StringTag;
}

impl NameTrait for String {
    type Tag = DefaultTag;
}

// Borrowed strings can be pushed but never read back.
impl<'a> PushTrait for &'a str {
    type Tag = StringTag;
}

impl VmTyped for CString {
    const VM_TYPE: VmType = VmType::String;
}

impl PushTrait for CString {
    type Tag = CStringTag;
}

impl CastTrait for CString {
    type Tag = CStringTag;
}

impl TypeTrait for CString {
    type Tag = DefaultTag;
}

impl ZeroTrait for CString {
    type Tag = StringTag;
}

impl NameTrait for CString {
    type Tag = DefaultTag;
}

macro_rules! impl_pointer {
    ($($ptr:tt),*) => {
        $(
            impl<T> VmTyped for *$ptr T {
                const VM_TYPE: VmType = VmType::LightUserdata;
            }

            impl<T> PushTrait for *$ptr T {
                type Tag = PointerTag;
            }

            impl<T> CastTrait for *$ptr T {
                type Tag = PointerTag;
            }

            impl<T> TypeTrait for *$ptr T {
                type Tag = DefaultTag;
            }

            impl<T> ZeroTrait for *$ptr T {
                type Tag = PointerTag;
            }

            impl<T> NameTrait for *$ptr T {
                type Tag = PointerTag;
            }
        )*
    };
}

impl_pointer!(mut, const);

macro_rules! impl_multi_push {
    ($($name:ident $var:ident),+) => {
        impl<$($name: PushTrait),+> PushTrait for ($($name,)+) {
            type Tag = MultiTag;
        }

        impl<$($name: PushTrait),+> PushPolicy<($($name,)+)> for MultiTag {
            fn push(vm: &mut Vm, value: ($($name,)+)) {
                let ($($var,)+) = value;
                $( <$name::Tag as PushPolicy<$name>>::push(vm, $var); )+
            }
        }
    };
}

impl_multi_push!(A a, B b);
impl_multi_push!(A a, B b, C c);
impl_multi_push!(A a, B b, C c, D d);
