//! Runtime values held in VM stack slots and tables.

use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use ordered_float::OrderedFloat;

use crate::heap::GcRef;

/// Runtime type of a stack slot.
///
/// The discriminants are the classic type codes of the reference VM, so
/// `i32::from(VmType::Number) == 3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum VmType {
    /// Invalid or empty stack position
    None = -1,
    Nil = 0,
    Boolean = 1,
    LightUserdata = 2,
    Number = 3,
    String = 4,
    Table = 5,
    Function = 6,
    Userdata = 7,
}

impl VmType {
    /// Canonical name of this type, as shown in error messages.
    pub fn name(self) -> &'static str {
        match self {
            VmType::None => "no value",
            VmType::Nil => "nil",
            VmType::Boolean => "boolean",
            VmType::LightUserdata | VmType::Userdata => "userdata",
            VmType::Number => "number",
            VmType::String => "string",
            VmType::Table => "table",
            VmType::Function => "function",
        }
    }
}

impl fmt::Display for VmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value stored in a stack slot, a table, or an upvalue.
///
/// Heap values (tables, functions, full userdata) are references into the
/// VM's arena; copying a `Value` never copies the referenced object.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    /// Integer representation of a number
    Integer(i64),
    /// Floating point representation of a number
    Number(f64),
    /// Immutable byte string; may contain interior NUL bytes and need not
    /// be valid UTF-8
    String(Rc<[u8]>),
    /// Bare pointer owned by the host, never dereferenced by the VM
    LightUserdata(*mut c_void),
    Table(GcRef),
    Function(GcRef),
    Userdata(GcRef),
}

impl Value {
    /// Runtime type of this value.
    pub fn vm_type(&self) -> VmType {
        match self {
            Value::Nil => VmType::Nil,
            Value::Boolean(_) => VmType::Boolean,
            Value::Integer(_) | Value::Number(_) => VmType::Number,
            Value::String(_) => VmType::String,
            Value::LightUserdata(_) => VmType::LightUserdata,
            Value::Table(_) => VmType::Table,
            Value::Function(_) => VmType::Function,
            Value::Userdata(_) => VmType::Userdata,
        }
    }

    /// Name of this value's runtime type.
    pub fn type_name(&self) -> &'static str {
        self.vm_type().name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Everything except `nil` and `false` is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Arena reference of a heap value.
    pub fn gc_ref(&self) -> Option<GcRef> {
        match self {
            Value::Table(r) | Value::Function(r) | Value::Userdata(r) => Some(*r),
            _ => None,
        }
    }

    /// Primitive equality: numbers by value, strings by content, heap
    /// objects and pointers by identity. Never consults metamethods.
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Integer(a), Value::Number(b)) | (Value::Number(b), Value::Integer(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::LightUserdata(a), Value::LightUserdata(b)) => a == b,
            (Value::Table(a), Value::Table(b))
            | (Value::Function(a), Value::Function(b))
            | (Value::Userdata(a), Value::Userdata(b)) => a == b,
            _ => false,
        }
    }

    /// Hashable form of this value, or `None` for values that cannot be
    /// table keys (`nil` and NaN).
    pub(crate) fn to_key(&self) -> Option<TableKey> {
        let key = match self {
            Value::Nil => return None,
            Value::Boolean(b) => TableKey::Boolean(*b),
            Value::Integer(i) => TableKey::Integer(*i),
            Value::Number(n) if n.is_nan() => return None,
            Value::Number(n) if n.fract() == 0.0 && n.abs() < i64::MAX as f64 => {
                TableKey::Integer(*n as i64)
            }
            Value::Number(n) => TableKey::Number(OrderedFloat(*n)),
            Value::String(s) => TableKey::String(Rc::clone(s)),
            Value::LightUserdata(p) => TableKey::LightUserdata(*p as usize),
            Value::Table(r) => TableKey::Table(*r),
            Value::Function(r) => TableKey::Function(*r),
            Value::Userdata(r) => TableKey::Userdata(*r),
        };
        Some(key)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s.as_bytes()))
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::String(Rc::from(bytes))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Boolean(b) => write!(f, "Boolean({})", b),
            Value::Integer(i) => write!(f, "Integer({})", i),
            Value::Number(n) => write!(f, "Number({})", n),
            Value::String(s) => write!(f, "String({:?})", String::from_utf8_lossy(s)),
            Value::LightUserdata(p) => write!(f, "LightUserdata({:p})", p),
            Value::Table(r) => write!(f, "Table({:?})", r),
            Value::Function(r) => write!(f, "Function({:?})", r),
            Value::Userdata(r) => write!(f, "Userdata({:?})", r),
        }
    }
}

/// Hashable table key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum TableKey {
    Boolean(bool),
    Integer(i64),
    Number(OrderedFloat<f64>),
    String(Rc<[u8]>),
    LightUserdata(usize),
    Table(GcRef),
    Function(GcRef),
    Userdata(GcRef),
}

impl TableKey {
    pub(crate) fn gc_ref(&self) -> Option<GcRef> {
        match self {
            TableKey::Table(r) | TableKey::Function(r) | TableKey::Userdata(r) => Some(*r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_match_reference_vm() {
        assert_eq!(i32::from(VmType::None), -1);
        assert_eq!(i32::from(VmType::Number), 3);
        assert!(matches!(VmType::try_from(7), Ok(VmType::Userdata)));
        assert!(VmType::try_from(42).is_err());
    }

    #[test]
    fn both_number_representations_are_numbers() {
        assert_eq!(Value::Integer(1).vm_type(), VmType::Number);
        assert_eq!(Value::Number(1.5).vm_type(), VmType::Number);
        assert_eq!(Value::Number(1.5).type_name(), "number");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::from("").is_truthy());
    }

    #[test]
    fn raw_equal_mixes_number_representations() {
        assert!(Value::Integer(2).raw_equal(&Value::Number(2.0)));
        assert!(!Value::Integer(2).raw_equal(&Value::Number(2.5)));
        assert!(Value::from("a").raw_equal(&Value::from("a")));
        assert!(!Value::from("1").raw_equal(&Value::Integer(1)));
    }

    #[test]
    fn strings_compare_by_bytes() {
        let raw = Value::from(&[0xff, b'a'][..]);
        assert!(raw.raw_equal(&Value::from(&[0xff, b'a'][..])));
        assert!(!raw.raw_equal(&Value::from("\u{fffd}a")));
        assert_eq!(raw.to_key(), Some(TableKey::String(Rc::from(&[0xff, b'a'][..]))));
    }

    #[test]
    fn integral_floats_normalise_to_integer_keys() {
        assert_eq!(Value::Number(3.0).to_key(), Some(TableKey::Integer(3)));
        assert_eq!(
            Value::Number(0.5).to_key(),
            Some(TableKey::Number(OrderedFloat(0.5)))
        );
        assert_eq!(Value::Nil.to_key(), None);
        assert_eq!(Value::Number(f64::NAN).to_key(), None);
    }
}
