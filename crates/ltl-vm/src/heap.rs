//! Generational arena for tables, userdata and functions.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::FxHashMap;

use crate::function::NativeFn;
use crate::value::{TableKey, Value};

/// Reference to a heap object.
///
/// Copyable and cheap. The generation makes references to freed-and-reused
/// slots resolve to nothing instead of to the new occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

bitflags! {
    /// Collector bookkeeping stored beside every object.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct ObjectFlags: u8 {
        /// Reached during the current mark phase
        const MARKED = 1 << 0;
        /// `__gc` already ran (or is scheduled to run) for this object
        const FINALIZED = 1 << 1;
    }
}

#[derive(Default)]
pub(crate) struct Table {
    pub(crate) entries: FxHashMap<TableKey, Value>,
    pub(crate) metatable: Option<GcRef>,
}

impl Table {
    pub(crate) fn get(&self, key: &Value) -> Value {
        key.to_key()
            .and_then(|k| self.entries.get(&k).cloned())
            .unwrap_or_default()
    }

    pub(crate) fn get_str(&self, key: &str) -> Value {
        self.entries
            .get(&TableKey::String(Rc::from(key.as_bytes())))
            .cloned()
            .unwrap_or_default()
    }
}

pub(crate) struct UserdataObject {
    pub(crate) payload: Box<dyn Any>,
    pub(crate) metatable: Option<GcRef>,
}

pub(crate) struct FunctionObject {
    pub(crate) func: NativeFn,
    pub(crate) upvalues: Rc<[Value]>,
}

pub(crate) enum HeapObject {
    Table(Table),
    Userdata(UserdataObject),
    Function(FunctionObject),
}

impl HeapObject {
    /// Heap references held directly by this object.
    pub(crate) fn children(&self, out: &mut Vec<GcRef>) {
        match self {
            HeapObject::Table(t) => {
                out.extend(t.metatable);
                for (k, v) in &t.entries {
                    out.extend(k.gc_ref());
                    out.extend(v.gc_ref());
                }
            }
            HeapObject::Userdata(u) => out.extend(u.metatable),
            HeapObject::Function(f) => out.extend(f.upvalues.iter().filter_map(Value::gc_ref)),
        }
    }
}

struct HeapSlot {
    generation: u32,
    flags: ObjectFlags,
    object: Option<HeapObject>,
}

/// Arena storage with slot reuse.
///
/// Freeing a slot bumps its generation, so any `GcRef` still pointing at it
/// is detectably stale.
pub(crate) struct Heap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
}

impl Heap {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    pub(crate) fn allocate(&mut self, object: HeapObject) -> GcRef {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.flags = ObjectFlags::empty();
            GcRef {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                flags: ObjectFlags::empty(),
                object: Some(object),
            });
            GcRef {
                index,
                generation: 0,
            }
        }
    }

    fn slot(&self, r: GcRef) -> Option<&HeapSlot> {
        self.slots
            .get(r.index as usize)
            .filter(|s| s.generation == r.generation && s.object.is_some())
    }

    fn slot_mut(&mut self, r: GcRef) -> Option<&mut HeapSlot> {
        self.slots
            .get_mut(r.index as usize)
            .filter(|s| s.generation == r.generation && s.object.is_some())
    }

    pub(crate) fn get(&self, r: GcRef) -> Option<&HeapObject> {
        self.slot(r)?.object.as_ref()
    }

    pub(crate) fn get_mut(&mut self, r: GcRef) -> Option<&mut HeapObject> {
        self.slot_mut(r)?.object.as_mut()
    }

    pub(crate) fn table(&self, r: GcRef) -> Option<&Table> {
        match self.get(r)? {
            HeapObject::Table(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn table_mut(&mut self, r: GcRef) -> Option<&mut Table> {
        match self.get_mut(r)? {
            HeapObject::Table(t) => Some(t),
            _ => None,
        }
    }

    pub(crate) fn userdata(&self, r: GcRef) -> Option<&UserdataObject> {
        match self.get(r)? {
            HeapObject::Userdata(u) => Some(u),
            _ => None,
        }
    }

    pub(crate) fn userdata_mut(&mut self, r: GcRef) -> Option<&mut UserdataObject> {
        match self.get_mut(r)? {
            HeapObject::Userdata(u) => Some(u),
            _ => None,
        }
    }

    pub(crate) fn function(&self, r: GcRef) -> Option<&FunctionObject> {
        match self.get(r)? {
            HeapObject::Function(f) => Some(f),
            _ => None,
        }
    }

    pub(crate) fn flags(&self, r: GcRef) -> ObjectFlags {
        self.slot(r).map(|s| s.flags).unwrap_or_default()
    }

    pub(crate) fn set_flags(&mut self, r: GcRef, flags: ObjectFlags, on: bool) {
        if let Some(slot) = self.slot_mut(r) {
            slot.flags.set(flags, on);
        }
    }

    /// Release an object. Returns the object so the caller decides when its
    /// payload is dropped.
    pub(crate) fn free(&mut self, r: GcRef) -> Option<HeapObject> {
        let slot = self.slot_mut(r)?;
        let object = slot.object.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.flags = ObjectFlags::empty();
        self.free_list.push(r.index);
        object
    }

    /// References to every live object.
    pub(crate) fn live_refs(&self) -> Vec<GcRef> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.object.is_some())
            .map(|(i, s)| GcRef {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.object.is_some()).count()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HeapObject {
        HeapObject::Table(Table::default())
    }

    #[test]
    fn allocate_and_resolve() {
        let mut heap = Heap::new();
        let r = heap.allocate(table());
        assert!(heap.table(r).is_some());
        assert!(heap.userdata(r).is_none());
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn freed_refs_go_stale() {
        let mut heap = Heap::new();
        let old = heap.allocate(table());
        assert!(heap.free(old).is_some());
        assert!(heap.get(old).is_none());

        let new = heap.allocate(table());
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(heap.get(old).is_none());
        assert!(heap.get(new).is_some());
    }

    #[test]
    fn double_free_is_ignored() {
        let mut heap = Heap::new();
        let r = heap.allocate(table());
        assert!(heap.free(r).is_some());
        assert!(heap.free(r).is_none());
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn flags_reset_on_reuse() {
        let mut heap = Heap::new();
        let r = heap.allocate(table());
        heap.set_flags(r, ObjectFlags::FINALIZED, true);
        assert!(heap.flags(r).contains(ObjectFlags::FINALIZED));
        heap.free(r);

        let r2 = heap.allocate(table());
        assert!(heap.flags(r2).is_empty());
    }

    #[test]
    fn table_children_include_keys_values_and_metatable() {
        let mut heap = Heap::new();
        let meta = heap.allocate(table());
        let key = heap.allocate(table());
        let value = heap.allocate(table());

        let mut t = Table::default();
        t.metatable = Some(meta);
        t.entries
            .insert(Value::Table(key).to_key().unwrap(), Value::Table(value));
        let mut out = Vec::new();
        HeapObject::Table(t).children(&mut out);

        assert!(out.contains(&meta));
        assert!(out.contains(&key));
        assert!(out.contains(&value));
    }
}
