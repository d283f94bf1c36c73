//! Uniform dispatch over the per-type policies in [`crate::stack_core`].
//!
//! ```
//! use ltl::stack_api::{cast, get, is_type, push};
//! use ltl_vm::Vm;
//!
//! let mut vm = Vm::new();
//! push(&mut vm, 42i32);
//! assert!(is_type::<i32>(&vm, 1));
//! assert_eq!(cast::<i32>(&vm, -1), 42);
//! assert_eq!(get::<String>(&vm, 2), "");
//! ```

use ltl_vm::Vm;

use crate::stack_core::{
    CastPolicy, CastTrait, NamePolicy, NameTrait, PushPolicy, PushTrait, TypePolicy, TypeTrait,
    ZeroPolicy, ZeroTrait,
};

/// Push `value` as a new top slot (one slot per value for tuples).
#[inline]
pub fn push<T: PushTrait>(vm: &mut Vm, value: T) {
    <T::Tag as PushPolicy<T>>::push(vm, value)
}

/// Read slot `n` as `T` without checking its type.
///
/// The result for a slot of the wrong type is whatever the VM's conversion
/// produces; use [`get`] or [`crate::sandbox::check`] when that matters.
#[inline]
pub fn cast<T: CastTrait>(vm: &Vm, n: i32) -> T {
    <T::Tag as CastPolicy<T>>::cast(vm, n)
}

/// Whether slot `n` holds a value compatible with `T`. Always false for
/// index 0 and indices outside the frame, except for the generic handle.
#[inline]
pub fn is_type<T: TypeTrait + ?Sized>(vm: &Vm, n: i32) -> bool {
    <T::Tag as TypePolicy<T>>::is_type(vm, n)
}

/// The canonical default of `T`. Never reads the stack.
#[inline]
pub fn zero<T: ZeroTrait>(vm: &Vm, n: i32) -> T {
    <T::Tag as ZeroPolicy<T>>::zero(vm, n)
}

/// Diagnostic label of `T`, as used in type errors.
#[inline]
pub fn name<T: NameTrait + ?Sized>(vm: &Vm, n: i32) -> String {
    <T::Tag as NamePolicy<T>>::name(vm, n)
}

/// Slot `n` as `T` if it type-checks, otherwise `default`.
pub fn get_default<T: TypeTrait + CastTrait>(vm: &Vm, n: i32, default: T) -> T {
    if is_type::<T>(vm, n) {
        cast(vm, n)
    } else {
        default
    }
}

/// Slot `n` as `T` if it type-checks, otherwise `T`'s zero value. Never
/// fails and has no side effects.
pub fn get<T: TypeTrait + CastTrait + ZeroTrait>(vm: &Vm, n: i32) -> T {
    if is_type::<T>(vm, n) {
        cast(vm, n)
    } else {
        zero(vm, n)
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{CString, c_void};

    use super::*;

    #[test]
    fn integers_round_trip() {
        let mut vm = Vm::new();
        push(&mut vm, -42i32);
        push(&mut vm, i64::MAX);
        push(&mut vm, 200u8);
        assert_eq!(cast::<i32>(&vm, 1), -42);
        assert_eq!(cast::<i64>(&vm, 2), i64::MAX);
        assert_eq!(cast::<u8>(&vm, 3), 200);
    }

    #[test]
    fn floats_round_trip() {
        let mut vm = Vm::new();
        push(&mut vm, 1.5f64);
        push(&mut vm, 0.25f32);
        assert_eq!(cast::<f64>(&vm, 1), 1.5);
        assert_eq!(cast::<f32>(&vm, 2), 0.25);
    }

    #[test]
    fn booleans_round_trip() {
        let mut vm = Vm::new();
        push(&mut vm, true);
        push(&mut vm, false);
        assert!(cast::<bool>(&vm, 1));
        assert!(!cast::<bool>(&vm, 2));
    }

    #[test]
    fn strings_round_trip_with_interior_nul() {
        let mut vm = Vm::new();
        push(&mut vm, String::from("foo\0bar"));
        push(&mut vm, "borrowed");
        assert_eq!(cast::<String>(&vm, 1), "foo\0bar");
        assert_eq!(cast::<String>(&vm, 2).len(), 8);
    }

    #[test]
    fn cstrings_round_trip() {
        let mut vm = Vm::new();
        let s = CString::new("hello").unwrap();
        push(&mut vm, s.clone());
        assert_eq!(cast::<CString>(&vm, 1), s);
    }

    #[test]
    fn non_utf8_cstrings_round_trip() {
        let mut vm = Vm::new();
        let s = CString::new(vec![0xff, b'a']).unwrap();
        push(&mut vm, s.clone());
        assert!(is_type::<CString>(&vm, 1));
        assert_eq!(cast::<CString>(&vm, 1).as_bytes(), &[0xff, b'a']);
    }

    #[test]
    fn pointers_round_trip() {
        let mut vm = Vm::new();
        let mut x = 5i32;
        let p: *mut i32 = &mut x;
        push(&mut vm, p);
        assert!(is_type::<*mut i32>(&vm, 1));
        assert_eq!(cast::<*mut i32>(&vm, 1), p);
        assert!(zero::<*mut c_void>(&vm, 1).is_null());
        assert_eq!(name::<*const u8>(&vm, 1), "pointer");
    }

    #[test]
    fn type_checks_by_vm_type() {
        let mut vm = Vm::new();
        push(&mut vm, 1i32);
        push(&mut vm, "s");
        push(&mut vm, true);
        assert!(is_type::<i32>(&vm, 1));
        assert!(is_type::<f64>(&vm, 1));
        assert!(!is_type::<i32>(&vm, 2));
        assert!(is_type::<String>(&vm, 2));
        assert!(is_type::<CString>(&vm, 2));
        assert!(is_type::<bool>(&vm, 3));
        assert!(!is_type::<bool>(&vm, 1));
    }

    #[test]
    fn unsigned_type_requires_non_negative() {
        let mut vm = Vm::new();
        push(&mut vm, -1i32);
        push(&mut vm, 0i32);
        assert!(!is_type::<u32>(&vm, 1));
        assert!(is_type::<u32>(&vm, 2));
        assert!(is_type::<i32>(&vm, 1));
    }

    #[test]
    fn out_of_range_indices_never_type_check() {
        let mut vm = Vm::new();
        push(&mut vm, 1i32);
        for n in [0, 2, -2] {
            assert!(!is_type::<i32>(&vm, n));
            assert!(!is_type::<u16>(&vm, n));
            assert!(!is_type::<f64>(&vm, n));
            assert!(!is_type::<bool>(&vm, n));
            assert!(!is_type::<String>(&vm, n));
            assert!(!is_type::<*mut c_void>(&vm, n));
        }
    }

    #[test]
    fn zero_values() {
        let vm = Vm::new();
        assert_eq!(zero::<i32>(&vm, 1), 0);
        assert_eq!(zero::<f64>(&vm, 1), 0.0);
        assert!(!zero::<bool>(&vm, 1));
        assert_eq!(zero::<String>(&vm, 1), "");
        assert_eq!(zero::<CString>(&vm, 1).as_bytes(), b"");
    }

    #[test]
    fn names() {
        let vm = Vm::new();
        assert_eq!(name::<i32>(&vm, 1), "integer");
        assert_eq!(name::<isize>(&vm, 1), "integer");
        assert_eq!(name::<u32>(&vm, 1), "unsigned");
        assert_eq!(name::<f32>(&vm, 1), "number");
        assert_eq!(name::<bool>(&vm, 1), "boolean");
        assert_eq!(name::<String>(&vm, 1), "string");
        assert_eq!(name::<CString>(&vm, 1), "string");
    }

    #[test]
    fn get_falls_back_to_zero() {
        let mut vm = Vm::new();
        push(&mut vm, "not a number");
        push(&mut vm, 7i32);
        assert_eq!(get::<i32>(&vm, 1), 0);
        assert_eq!(get::<i32>(&vm, 2), 7);
        assert_eq!(get::<i32>(&vm, 3), 0);
        assert_eq!(get::<String>(&vm, 2), "");
    }

    #[test]
    fn get_default_uses_supplied_value() {
        let mut vm = Vm::new();
        push(&mut vm, true);
        assert_eq!(get_default(&vm, 1, 9i32), 9);
        assert!(get_default(&vm, 1, false));
    }

    #[test]
    fn tuples_push_every_element() {
        let mut vm = Vm::new();
        push(&mut vm, (1i32, 2.5f64));
        assert_eq!(vm.top(), 2);
        assert_eq!(cast::<f64>(&vm, 2), 2.5);
    }
}
