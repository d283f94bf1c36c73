//! The VM state: value stack, call frames, globals and registry.
//!
//! The API follows the classic embedded-interpreter model. Host code
//! addresses stack slots with 1-based indices relative to the running
//! frame; negative indices count down from the top. Index 0 and indices
//! past the top never address a value.

use std::any::{Any, TypeId};
use std::ffi::c_void;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::error::ScriptError;
use crate::function::NativeFn;
use crate::heap::{FunctionObject, GcRef, Heap, HeapObject, Table, UserdataObject};
use crate::value::{Value, VmType};

/// Request every result of a call.
pub const MULTRET: i32 = -1;

/// Maximum `__index` chain length followed by [`Vm::get_field`].
const MAX_INDEX_CHAIN: usize = 100;

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a VM session.
///
/// Handles store this instead of a pointer to the VM, so a handle created
/// against one session never validates against another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VmId(u64);

/// Tunables for a VM session.
#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Maximum nesting of native calls before `StackOverflow` is raised.
    pub max_call_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self { max_call_depth: 200 }
    }
}

pub(crate) struct Frame {
    /// Absolute position of stack index 1
    base: usize,
    pub(crate) upvalues: Rc<[Value]>,
}

/// An embedded VM session.
pub struct Vm {
    id: VmId,
    config: VmConfig,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) heap: Heap,
    pub(crate) globals: GcRef,
    pub(crate) registry: GcRef,
    app_data: FxHashMap<TypeId, Box<dyn Any>>,
}

impl Vm {
    /// Open a new session with default configuration.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut heap = Heap::new();
        let globals = heap.allocate(HeapObject::Table(Table::default()));
        let registry = heap.allocate(HeapObject::Table(Table::default()));
        Self {
            id: VmId(NEXT_VM_ID.fetch_add(1, Ordering::Relaxed)),
            config,
            stack: Vec::new(),
            frames: vec![Frame {
                base: 0,
                upvalues: Rc::from(Vec::new()),
            }],
            heap,
            globals,
            registry,
            app_data: FxHashMap::default(),
        }
    }

    pub fn id(&self) -> VmId {
        self.id
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    // =========================================================================
    // Index arithmetic
    // =========================================================================

    fn frame(&self) -> &Frame {
        // The root frame is never popped.
        &self.frames[self.frames.len() - 1]
    }

    fn base(&self) -> usize {
        self.frame().base
    }

    /// Absolute stack position of `idx`, if it addresses a live slot.
    fn slot(&self, idx: i32) -> Option<usize> {
        let base = self.base();
        let len = self.stack.len();
        if idx > 0 {
            let pos = base + (idx as usize - 1);
            (pos < len).then_some(pos)
        } else if idx < 0 {
            let back = idx.unsigned_abs() as usize;
            (back <= len - base).then(|| len - back)
        } else {
            None
        }
    }

    /// Number of values in the current frame.
    pub fn top(&self) -> i32 {
        (self.stack.len() - self.base()) as i32
    }

    /// Grow (with nil) or shrink the current frame. Negative values count
    /// from the top, so `set_top(-1)` is a no-op and `set_top(-2)` pops one.
    pub fn set_top(&mut self, idx: i32) {
        let base = self.base();
        let new_len = if idx >= 0 {
            base + idx as usize
        } else {
            let keep = self.top() + 1 + idx;
            base + keep.max(0) as usize
        };
        self.stack.resize(new_len, Value::Nil);
    }

    /// Convert a relative index into a positive one. Negative indices that
    /// reach below the frame yield 0.
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx < 0 {
            (self.top() + 1 + idx).max(0)
        } else {
            idx
        }
    }

    pub fn is_valid_index(&self, idx: i32) -> bool {
        self.slot(idx).is_some()
    }

    /// Value at `idx`, or `None` for an invalid index.
    pub fn value(&self, idx: i32) -> Option<&Value> {
        self.slot(idx).map(|pos| &self.stack[pos])
    }

    fn value_or_nil(&self, idx: i32) -> Value {
        self.value(idx).cloned().unwrap_or_default()
    }

    /// Runtime type at `idx`; `VmType::None` for an invalid index.
    pub fn type_of(&self, idx: i32) -> VmType {
        self.value(idx).map_or(VmType::None, Value::vm_type)
    }

    /// Type name of the value at `idx`.
    pub fn type_name_at(&self, idx: i32) -> &'static str {
        self.type_of(idx).name()
    }

    // =========================================================================
    // Push
    // =========================================================================

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn push_nil(&mut self) {
        self.push(Value::Nil);
    }

    pub fn push_boolean(&mut self, b: bool) {
        self.push(Value::Boolean(b));
    }

    pub fn push_integer(&mut self, i: i64) {
        self.push(Value::Integer(i));
    }

    pub fn push_number(&mut self, n: f64) {
        self.push(Value::Number(n));
    }

    pub fn push_string(&mut self, s: &str) {
        self.push(Value::from(s));
    }

    /// Push a byte string. The bytes are kept as given, UTF-8 or not.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.push(Value::from(bytes));
    }

    pub fn push_light_userdata(&mut self, p: *mut c_void) {
        self.push(Value::LightUserdata(p));
    }

    /// Push a copy of the value at `idx` (nil for an invalid index).
    pub fn push_value(&mut self, idx: i32) {
        let v = self.value_or_nil(idx);
        self.push(v);
    }

    pub fn push_function<F>(&mut self, f: F)
    where
        F: Fn(&mut Vm) -> Result<i32, ScriptError> + 'static,
    {
        self.push_closure(f, 0);
    }

    /// Push a native closure capturing the top `nup` values as upvalues.
    pub fn push_closure<F>(&mut self, f: F, nup: usize)
    where
        F: Fn(&mut Vm) -> Result<i32, ScriptError> + 'static,
    {
        self.push_native_fn(NativeFn::new(f), nup);
    }

    pub fn push_native_fn(&mut self, func: NativeFn, nup: usize) {
        let split = self.stack.len() - nup.min(self.top() as usize);
        let upvalues: Rc<[Value]> = self.stack.drain(split..).collect();
        let r = self
            .heap
            .allocate(HeapObject::Function(FunctionObject { func, upvalues }));
        self.push(Value::Function(r));
    }

    pub fn new_table(&mut self) {
        let r = self.heap.allocate(HeapObject::Table(Table::default()));
        self.push(Value::Table(r));
    }

    /// Allocate a full userdata owning `payload` and push it.
    pub fn new_userdata<T: Any>(&mut self, payload: T) {
        let r = self.heap.allocate(HeapObject::Userdata(UserdataObject {
            payload: Box::new(payload),
            metatable: None,
        }));
        self.push(Value::Userdata(r));
    }

    // =========================================================================
    // Read
    // =========================================================================

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value(idx).is_some_and(Value::is_truthy)
    }

    /// Numeric value truncated to an integer; 0 when not convertible.
    pub fn to_integer(&self, idx: i32) -> i64 {
        match self.value(idx) {
            Some(Value::Integer(i)) => *i,
            Some(Value::Number(n)) => *n as i64,
            Some(Value::String(s)) => parse_number(s).map_or(0, |n| n as i64),
            _ => 0,
        }
    }

    /// Numeric value; 0.0 when not convertible.
    pub fn to_number(&self, idx: i32) -> f64 {
        match self.value(idx) {
            Some(Value::Integer(i)) => *i as f64,
            Some(Value::Number(n)) => *n,
            Some(Value::String(s)) => parse_number(s).unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// String contents as text, converting numbers. Invalid UTF-8 is
    /// replaced with U+FFFD. `None` for other types.
    pub fn to_string(&self, idx: i32) -> Option<Rc<str>> {
        match self.value(idx)? {
            Value::String(s) => Some(Rc::from(String::from_utf8_lossy(s).as_ref())),
            Value::Integer(i) => Some(Rc::from(i.to_string())),
            Value::Number(n) => Some(Rc::from(n.to_string())),
            _ => None,
        }
    }

    /// Raw string bytes, converting numbers. `None` for other types.
    pub fn to_bytes(&self, idx: i32) -> Option<Rc<[u8]>> {
        match self.value(idx)? {
            Value::String(s) => Some(Rc::clone(s)),
            Value::Integer(i) => Some(Rc::from(i.to_string().as_bytes())),
            Value::Number(n) => Some(Rc::from(n.to_string().as_bytes())),
            _ => None,
        }
    }

    /// Light userdata address; null for every other value.
    pub fn to_pointer(&self, idx: i32) -> *mut c_void {
        match self.value(idx) {
            Some(Value::LightUserdata(p)) => *p,
            _ => std::ptr::null_mut(),
        }
    }

    /// Borrow the payload of the full userdata at `idx`.
    pub fn userdata<T: Any>(&self, idx: i32) -> Option<&T> {
        let r = match self.value(idx)? {
            Value::Userdata(r) => *r,
            _ => return None,
        };
        self.heap.userdata(r)?.payload.downcast_ref::<T>()
    }

    /// Mutably borrow the payload of the full userdata at `idx`.
    pub fn userdata_mut<T: Any>(&mut self, idx: i32) -> Option<&mut T> {
        let r = match self.value(idx)? {
            Value::Userdata(r) => *r,
            _ => return None,
        };
        self.heap.userdata_mut(r)?.payload.downcast_mut::<T>()
    }

    pub fn raw_equal(&self, a: i32, b: i32) -> bool {
        match (self.value(a), self.value(b)) {
            (Some(x), Some(y)) => x.raw_equal(y),
            _ => false,
        }
    }

    // =========================================================================
    // Stack manipulation
    // =========================================================================

    pub fn pop(&mut self, n: usize) {
        let keep = self.stack.len() - n.min(self.top() as usize);
        self.stack.truncate(keep);
    }

    /// Move the top value into `idx`, shifting the values above it up.
    pub fn insert(&mut self, idx: i32) {
        if let Some(pos) = self.slot(idx)
            && let Some(v) = self.stack.pop()
        {
            self.stack.insert(pos, v);
        }
    }

    /// Remove the value at `idx`, shifting the values above it down.
    pub fn remove(&mut self, idx: i32) {
        if let Some(pos) = self.slot(idx) {
            self.stack.remove(pos);
        }
    }

    fn pop_value(&mut self) -> Value {
        if self.top() > 0 {
            self.stack.pop().unwrap_or_default()
        } else {
            Value::Nil
        }
    }

    // =========================================================================
    // Tables
    // =========================================================================

    fn table_ref(&self, idx: i32) -> Result<GcRef, ScriptError> {
        match self.value(idx) {
            Some(Value::Table(r)) => Ok(*r),
            Some(v) => Err(ScriptError::NotIndexable(v.type_name())),
            None => Err(ScriptError::NotIndexable(VmType::None.name())),
        }
    }

    fn raw_set_ref(&mut self, t: GcRef, key: Value, value: Value) -> Result<(), ScriptError> {
        let key = key
            .to_key()
            .ok_or_else(|| ScriptError::runtime("table index is nil or NaN"))?;
        let table = self
            .heap
            .table_mut(t)
            .ok_or(ScriptError::NotIndexable("table"))?;
        if value.is_nil() {
            table.entries.remove(&key);
        } else {
            table.entries.insert(key, value);
        }
        Ok(())
    }

    /// Replace the key on top of the stack with `t[key]`, where `t` is the
    /// table at `idx`. Ignores metamethods.
    pub fn raw_get(&mut self, idx: i32) -> Result<VmType, ScriptError> {
        let t = self.table_ref(idx)?;
        let key = self.pop_value();
        let v = self.heap.table(t).map(|t| t.get(&key)).unwrap_or_default();
        let ty = v.vm_type();
        self.push(v);
        Ok(ty)
    }

    /// Pop a value and then a key, and store `t[key] = value` in the table at
    /// `idx`. Ignores metamethods.
    pub fn raw_set(&mut self, idx: i32) -> Result<(), ScriptError> {
        let t = self.table_ref(idx)?;
        let value = self.pop_value();
        let key = self.pop_value();
        self.raw_set_ref(t, key, value)
    }

    /// Look `key` up on `object`, following `__index` chains.
    fn index_value(&mut self, object: Value, key: Value) -> Result<Value, ScriptError> {
        let mut current = object;
        for _ in 0..MAX_INDEX_CHAIN {
            let metatable = match &current {
                Value::Table(r) => {
                    let table = self
                        .heap
                        .table(*r)
                        .ok_or(ScriptError::NotIndexable("table"))?;
                    let v = table.get(&key);
                    if !v.is_nil() {
                        return Ok(v);
                    }
                    match table.metatable {
                        Some(mt) => mt,
                        None => return Ok(Value::Nil),
                    }
                }
                Value::Userdata(r) => self
                    .heap
                    .userdata(*r)
                    .and_then(|u| u.metatable)
                    .ok_or(ScriptError::NotIndexable("userdata"))?,
                other => return Err(ScriptError::NotIndexable(other.type_name())),
            };

            let handler = self
                .heap
                .table(metatable)
                .map(|mt| mt.get_str("__index"))
                .unwrap_or_default();
            match handler {
                Value::Nil if matches!(current, Value::Table(_)) => return Ok(Value::Nil),
                Value::Nil => return Err(ScriptError::NotIndexable(current.type_name())),
                Value::Function(_) => {
                    self.push(handler);
                    self.push(current);
                    self.push(key);
                    self.call(2, 1)?;
                    return Ok(self.pop_value());
                }
                next => current = next,
            }
        }
        Err(ScriptError::runtime("'__index' chain too long; possible loop"))
    }

    /// Push `object[name]` for the value at `idx`, honouring `__index`.
    pub fn get_field(&mut self, idx: i32, name: &str) -> Result<VmType, ScriptError> {
        let object = self
            .value(idx)
            .cloned()
            .ok_or(ScriptError::NotIndexable(VmType::None.name()))?;
        let v = self.index_value(object, Value::from(name))?;
        let ty = v.vm_type();
        self.push(v);
        Ok(ty)
    }

    /// Pop a value and store it as `t[name]` in the table at `idx`.
    pub fn set_field(&mut self, idx: i32, name: &str) -> Result<(), ScriptError> {
        let t = self.table_ref(idx)?;
        let value = self.pop_value();
        self.raw_set_ref(t, Value::from(name), value)
    }

    pub fn get_global(&mut self, name: &str) -> VmType {
        let v = self
            .heap
            .table(self.globals)
            .map(|g| g.get_str(name))
            .unwrap_or_default();
        let ty = v.vm_type();
        self.push(v);
        ty
    }

    /// Pop a value into the global `name`.
    pub fn set_global(&mut self, name: &str) {
        let value = self.pop_value();
        let key = Value::from(name).to_key();
        if let (Some(key), Some(globals)) = (key, self.heap.table_mut(self.globals)) {
            if value.is_nil() {
                globals.entries.remove(&key);
            } else {
                globals.entries.insert(key, value);
            }
        }
    }

    // =========================================================================
    // Metatables
    // =========================================================================

    /// Metatable of the value at `idx`, without touching the stack.
    pub fn metatable_of(&self, idx: i32) -> Option<GcRef> {
        match self.value(idx)? {
            Value::Table(r) => self.heap.table(*r)?.metatable,
            Value::Userdata(r) => self.heap.userdata(*r)?.metatable,
            _ => None,
        }
    }

    /// Push the metatable of the value at `idx`. Pushes nothing and returns
    /// false when there is none.
    pub fn get_metatable(&mut self, idx: i32) -> bool {
        match self.metatable_of(idx) {
            Some(mt) => {
                self.push(Value::Table(mt));
                true
            }
            None => false,
        }
    }

    /// Pop a table (or nil) and install it as the metatable of the value at
    /// `idx`.
    pub fn set_metatable(&mut self, idx: i32) -> Result<(), ScriptError> {
        let target = self.value_or_nil(idx);
        let metatable = match self.pop_value() {
            Value::Table(r) => Some(r),
            Value::Nil => None,
            other => {
                return Err(ScriptError::runtime(format!(
                    "metatable must be a table or nil, got {}",
                    other.type_name()
                )));
            }
        };
        match target {
            Value::Table(r) => {
                if let Some(t) = self.heap.table_mut(r) {
                    t.metatable = metatable;
                }
            }
            Value::Userdata(r) => {
                if let Some(u) = self.heap.userdata_mut(r) {
                    u.metatable = metatable;
                }
            }
            other => {
                return Err(ScriptError::runtime(format!(
                    "cannot set the metatable of a {} value",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    fn protection_field(&self, idx: i32) -> Value {
        self.metatable_of(idx)
            .and_then(|mt| self.heap.table(mt))
            .map(|mt| mt.get_str("__metatable"))
            .unwrap_or_default()
    }

    /// What a script sees from `getmetatable(v)`: the `__metatable` field
    /// when the metatable carries one, otherwise the metatable itself.
    pub fn script_getmetatable(&mut self, idx: i32) {
        let guard = self.protection_field(idx);
        if !guard.is_nil() {
            self.push(guard);
        } else if !self.get_metatable(idx) {
            self.push_nil();
        }
    }

    /// What a script gets from `setmetatable(v, mt)`: refuses to replace a
    /// metatable protected by `__metatable`.
    pub fn script_setmetatable(&mut self, idx: i32) -> Result<(), ScriptError> {
        if !self.protection_field(idx).is_nil() {
            self.pop(1);
            return Err(ScriptError::ProtectedMetatable);
        }
        self.set_metatable(idx)
    }

    /// Metatable registered under `name`, without touching the stack.
    pub fn named_metatable(&self, name: &str) -> Option<GcRef> {
        match self.heap.table(self.registry)?.get_str(name) {
            Value::Table(r) => Some(r),
            _ => None,
        }
    }

    /// Push the metatable registered under `name`, creating it when absent.
    /// Returns false if the name was already taken.
    pub fn new_metatable(&mut self, name: &str) -> bool {
        if let Some(existing) = self.named_metatable(name) {
            self.push(Value::Table(existing));
            return false;
        }
        let r = self.heap.allocate(HeapObject::Table(Table::default()));
        if let (Some(key), Some(registry)) =
            (Value::from(name).to_key(), self.heap.table_mut(self.registry))
        {
            registry.entries.insert(key, Value::Table(r));
        }
        self.push(Value::Table(r));
        true
    }

    /// Push the metatable registered under `name`, or nil.
    pub fn get_named_metatable(&mut self, name: &str) -> VmType {
        match self.named_metatable(name) {
            Some(r) => {
                self.push(Value::Table(r));
                VmType::Table
            }
            None => {
                self.push_nil();
                VmType::Nil
            }
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Upvalue `n` (1-based) of the running closure.
    pub fn upvalue(&self, n: usize) -> Option<&Value> {
        n.checked_sub(1).and_then(|i| self.frame().upvalues.get(i))
    }

    pub fn push_upvalue(&mut self, n: usize) -> bool {
        match self.upvalue(n).cloned() {
            Some(v) => {
                self.push(v);
                true
            }
            None => false,
        }
    }

    /// Call the function sitting below the top `nargs` values.
    ///
    /// The function and its arguments are replaced by `nresults` results
    /// (all of them with [`MULTRET`]). On error the function and arguments
    /// are discarded and the error is returned.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&mut self, nargs: usize, nresults: i32) -> Result<(), ScriptError> {
        if nargs + 1 > self.top() as usize {
            return Err(ScriptError::runtime("not enough values on the stack for call"));
        }
        let func_pos = self.stack.len() - nargs - 1;
        let callee = match &self.stack[func_pos] {
            Value::Function(r) => self
                .heap
                .function(*r)
                .map(|f| (f.func.clone(), Rc::clone(&f.upvalues))),
            _ => None,
        };
        let Some((func, upvalues)) = callee else {
            let type_name = self.stack[func_pos].type_name();
            self.stack.truncate(func_pos);
            return Err(ScriptError::NotCallable(type_name));
        };
        if self.frames.len() > self.config.max_call_depth {
            self.stack.truncate(func_pos);
            return Err(ScriptError::StackOverflow {
                limit: self.config.max_call_depth,
            });
        }

        self.frames.push(Frame {
            base: func_pos + 1,
            upvalues,
        });
        let outcome = func.call(self);
        self.frames.pop();

        match outcome {
            Ok(count) => {
                let available = self.stack.len().saturating_sub(func_pos + 1);
                let count = (count.max(0) as usize).min(available);
                let first = self.stack.len() - count;
                let results: Vec<Value> = self.stack.drain(first..).collect();
                self.stack.truncate(func_pos);
                self.stack.extend(results);
                if nresults != MULTRET {
                    self.stack.resize(func_pos + nresults.max(0) as usize, Value::Nil);
                }
                Ok(())
            }
            Err(e) => {
                self.stack.truncate(func_pos);
                Err(e)
            }
        }
    }

    /// Like [`Vm::call`], but a failure leaves the error message on the
    /// stack in place of the results.
    pub fn pcall(&mut self, nargs: usize, nresults: i32) -> Result<(), ScriptError> {
        self.call(nargs, nresults).inspect_err(|e| {
            self.push(Value::from(e.to_string().as_str()));
        })
    }

    // =========================================================================
    // Application data
    // =========================================================================

    /// Attach session-scoped host data, replacing any previous value of the
    /// same type.
    pub fn set_app_data<T: Any>(&mut self, data: T) {
        self.app_data.insert(TypeId::of::<T>(), Box::new(data));
    }

    pub fn app_data<T: Any>(&self) -> Option<&T> {
        self.app_data.get(&TypeId::of::<T>())?.downcast_ref::<T>()
    }

    pub fn app_data_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.app_data.get_mut(&TypeId::of::<T>())?.downcast_mut::<T>()
    }

    /// Fetch host data of type `T`, inserting its default first if needed.
    pub fn app_data_or_default<T: Any + Default>(&mut self) -> &mut T {
        let slot = self
            .app_data
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(T::default()));
        match slot.downcast_mut::<T>() {
            Some(data) => data,
            None => unreachable!("app data is keyed by its own TypeId"),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.id)
            .field("top", &self.top())
            .field("depth", &self.frames.len())
            .field("heap", &self.heap)
            .finish()
    }
}

fn parse_number(bytes: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(bytes).ok()?.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|i| i as f64);
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(vm: &mut Vm) -> Result<i32, ScriptError> {
        let sum = vm.to_integer(1) + vm.to_integer(2);
        vm.push_integer(sum);
        Ok(1)
    }

    #[test]
    fn indices_are_one_based_and_frame_relative() {
        let mut vm = Vm::new();
        vm.push_integer(10);
        vm.push_integer(20);

        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_integer(1), 10);
        assert_eq!(vm.to_integer(-1), 20);
        assert_eq!(vm.abs_index(-1), 2);
        assert_eq!(vm.abs_index(-3), 0);
        assert!(!vm.is_valid_index(0));
        assert!(!vm.is_valid_index(3));
        assert!(!vm.is_valid_index(-3));
        assert_eq!(vm.type_of(3), VmType::None);
    }

    #[test]
    fn set_top_grows_and_shrinks() {
        let mut vm = Vm::new();
        vm.set_top(3);
        assert_eq!(vm.top(), 3);
        assert_eq!(vm.type_of(3), VmType::Nil);
        vm.set_top(-2);
        assert_eq!(vm.top(), 2);
        vm.set_top(0);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn insert_and_remove() {
        let mut vm = Vm::new();
        vm.push_integer(1);
        vm.push_integer(2);
        vm.push_integer(3);
        vm.insert(1);
        assert_eq!(vm.to_integer(1), 3);
        vm.remove(1);
        assert_eq!(vm.to_integer(1), 1);
        assert_eq!(vm.top(), 2);
    }

    #[test]
    fn number_conversions() {
        let mut vm = Vm::new();
        vm.push_number(3.9);
        vm.push_string("42");
        vm.push_boolean(true);
        assert_eq!(vm.to_integer(1), 3);
        assert_eq!(vm.to_integer(2), 42);
        assert_eq!(vm.to_number(3), 0.0);
        assert_eq!(vm.to_string(1).as_deref(), Some("3.9"));
        assert!(vm.to_string(3).is_none());
    }

    #[test]
    fn strings_keep_interior_nul() {
        let mut vm = Vm::new();
        vm.push_string("foo\0bar");
        assert_eq!(vm.to_string(-1).as_deref(), Some("foo\0bar"));
    }

    #[test]
    fn byte_strings_are_kept_verbatim() {
        let mut vm = Vm::new();
        vm.push_bytes(&[0xff, b'a']);
        assert_eq!(vm.type_of(-1), VmType::String);
        assert_eq!(vm.to_bytes(-1).as_deref(), Some(&[0xff, b'a'][..]));
        assert_eq!(vm.to_string(-1).as_deref(), Some("\u{fffd}a"));
        assert_eq!(vm.to_integer(-1), 0);
    }

    #[test]
    fn call_replaces_function_and_args_with_results() {
        let mut vm = Vm::new();
        vm.push_integer(99);
        vm.push_function(add);
        vm.push_integer(2);
        vm.push_integer(3);
        vm.call(2, 1).unwrap();

        assert_eq!(vm.top(), 2);
        assert_eq!(vm.to_integer(-1), 5);
        assert_eq!(vm.to_integer(1), 99);
    }

    #[test]
    fn call_pads_missing_results_with_nil() {
        let mut vm = Vm::new();
        vm.push_function(|_: &mut Vm| Ok(0));
        vm.call(0, 2).unwrap();
        assert_eq!(vm.top(), 2);
        assert_eq!(vm.type_of(1), VmType::Nil);
    }

    #[test]
    fn callee_sees_only_its_own_window() {
        let mut vm = Vm::new();
        vm.push_string("outer");
        vm.push_function(|vm: &mut Vm| {
            vm.push_integer(vm.top() as i64);
            Ok(1)
        });
        vm.push_nil();
        vm.call(1, MULTRET).unwrap();
        assert_eq!(vm.to_integer(-1), 1);
    }

    #[test]
    fn pcall_leaves_message_on_error() {
        let mut vm = Vm::new();
        vm.push_function(|_: &mut Vm| Err(ScriptError::runtime("boom")));
        let err = vm.pcall(0, 0).unwrap_err();
        assert_eq!(err, ScriptError::runtime("boom"));
        assert_eq!(vm.top(), 1);
        assert_eq!(vm.to_string(-1).as_deref(), Some("boom"));
    }

    #[test]
    fn calling_a_non_function_fails() {
        let mut vm = Vm::new();
        vm.push_integer(1);
        let err = vm.call(0, 0).unwrap_err();
        assert_eq!(err, ScriptError::NotCallable("number"));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn runaway_recursion_overflows() {
        fn recurse(vm: &mut Vm) -> Result<i32, ScriptError> {
            vm.push_function(recurse);
            vm.call(0, 0)?;
            Ok(0)
        }
        let mut vm = Vm::with_config(VmConfig { max_call_depth: 8 });
        vm.push_function(recurse);
        let err = vm.call(0, 0).unwrap_err();
        assert!(matches!(err, ScriptError::StackOverflow { limit: 8 }));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn closures_see_their_upvalues() {
        let mut vm = Vm::new();
        vm.push_integer(7);
        vm.push_closure(
            |vm: &mut Vm| {
                assert!(vm.push_upvalue(1));
                assert!(vm.upvalue(2).is_none());
                Ok(1)
            },
            1,
        );
        assert_eq!(vm.top(), 1);
        vm.call(0, 1).unwrap();
        assert_eq!(vm.to_integer(-1), 7);
    }

    #[test]
    fn fields_and_globals() {
        let mut vm = Vm::new();
        vm.new_table();
        vm.push_integer(5);
        vm.set_field(1, "x").unwrap();
        vm.get_field(1, "x").unwrap();
        assert_eq!(vm.to_integer(-1), 5);
        vm.pop(1);

        vm.set_global("t");
        assert_eq!(vm.top(), 0);
        assert_eq!(vm.get_global("t"), VmType::Table);
        assert_eq!(vm.get_global("missing"), VmType::Nil);
    }

    #[test]
    fn raw_get_and_set() {
        let mut vm = Vm::new();
        vm.new_table();
        vm.push_integer(1);
        vm.push_string("one");
        vm.raw_set(1).unwrap();
        vm.push_number(1.0);
        assert_eq!(vm.raw_get(1).unwrap(), VmType::String);
        assert_eq!(vm.to_string(-1).as_deref(), Some("one"));
    }

    #[test]
    fn nil_key_is_rejected() {
        let mut vm = Vm::new();
        vm.new_table();
        vm.push_nil();
        vm.push_integer(1);
        assert!(vm.raw_set(1).is_err());
    }

    #[test]
    fn index_falls_through_to_metatable() {
        let mut vm = Vm::new();
        vm.new_table(); // 1: object
        vm.new_table(); // 2: methods
        vm.push_integer(3);
        vm.set_field(2, "x").unwrap();
        vm.new_table(); // 3: metatable
        vm.push_value(2);
        vm.set_field(3, "__index").unwrap();
        vm.set_metatable(1).unwrap();

        assert_eq!(vm.get_field(1, "x").unwrap(), VmType::Number);
        assert_eq!(vm.to_integer(-1), 3);
    }

    #[test]
    fn index_function_handler_is_called() {
        let mut vm = Vm::new();
        vm.new_userdata(0u8);
        vm.new_table();
        vm.push_function(|vm: &mut Vm| {
            let key = vm.to_string(2).unwrap_or_default();
            vm.push_string(&format!("got {}", key));
            Ok(1)
        });
        vm.set_field(2, "__index").unwrap();
        vm.set_metatable(1).unwrap();

        vm.get_field(1, "name").unwrap();
        assert_eq!(vm.to_string(-1).as_deref(), Some("got name"));
    }

    #[test]
    fn indexing_plain_userdata_fails() {
        let mut vm = Vm::new();
        vm.new_userdata(1i32);
        let err = vm.get_field(1, "x").unwrap_err();
        assert_eq!(err, ScriptError::NotIndexable("userdata"));
    }

    #[test]
    fn named_metatables_are_unique() {
        let mut vm = Vm::new();
        assert!(vm.new_metatable("Point"));
        assert!(!vm.new_metatable("Point"));
        assert!(vm.raw_equal(1, 2));
        assert_eq!(vm.get_named_metatable("Missing"), VmType::Nil);
        assert!(vm.named_metatable("Point").is_some());
    }

    #[test]
    fn protected_metatable_cannot_be_replaced() {
        let mut vm = Vm::new();
        vm.new_userdata(());
        vm.new_table();
        vm.push_string("locked");
        vm.set_field(2, "__metatable").unwrap();
        vm.set_metatable(1).unwrap();

        vm.script_getmetatable(1);
        assert_eq!(vm.to_string(-1).as_deref(), Some("locked"));
        vm.pop(1);

        vm.new_table();
        assert_eq!(
            vm.script_setmetatable(1).unwrap_err(),
            ScriptError::ProtectedMetatable
        );
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn userdata_payload_downcasts() {
        let mut vm = Vm::new();
        vm.new_userdata(41i32);
        *vm.userdata_mut::<i32>(1).unwrap() += 1;
        assert_eq!(vm.userdata::<i32>(1), Some(&42));
        assert!(vm.userdata::<u8>(1).is_none());
    }

    #[test]
    fn light_userdata_round_trip() {
        let mut vm = Vm::new();
        let mut x = 5i32;
        let p = &mut x as *mut i32 as *mut c_void;
        vm.push_light_userdata(p);
        assert_eq!(vm.to_pointer(1), p);
        assert_eq!(vm.type_of(1), VmType::LightUserdata);
    }

    #[test]
    fn app_data_is_per_session() {
        let mut a = Vm::new();
        let b = Vm::new();
        a.set_app_data(String::from("session a"));
        assert_eq!(a.app_data::<String>().map(String::as_str), Some("session a"));
        assert!(b.app_data::<String>().is_none());
        assert_ne!(a.id(), b.id());

        *a.app_data_or_default::<u32>() += 2;
        assert_eq!(a.app_data::<u32>(), Some(&2));
    }
}
