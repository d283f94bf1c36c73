//! Stop-the-world mark and sweep collection with `__gc` finalizers.
//!
//! Unreachable userdata whose metatable carries a `__gc` function is not
//! freed on the cycle that finds it. It is flagged finalized, kept alive for
//! that cycle, and its finalizer runs once the sweep is done. The next cycle
//! that finds it unreachable frees it for good.

use crate::heap::{GcRef, ObjectFlags};
use crate::value::Value;
use crate::vm::Vm;

impl Vm {
    /// Run a full collection cycle. Returns the number of objects freed.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn collect_garbage(&mut self) -> usize {
        let roots = self.roots();
        self.mark(roots);

        let pending: Vec<(GcRef, GcRef)> = self
            .heap
            .live_refs()
            .into_iter()
            .filter(|r| self.heap.flags(*r).is_empty())
            .filter_map(|r| self.finalizer_of(r).map(|f| (r, f)))
            .collect();
        for (r, _) in &pending {
            self.heap.set_flags(*r, ObjectFlags::FINALIZED, true);
        }
        self.mark(pending.iter().flat_map(|(r, f)| [*r, *f]).collect());

        let mut released = Vec::new();
        for r in self.heap.live_refs() {
            if self.heap.flags(r).contains(ObjectFlags::MARKED) {
                self.heap.set_flags(r, ObjectFlags::MARKED, false);
            } else if let Some(object) = self.heap.free(r) {
                released.push(object);
            }
        }
        let freed = released.len();
        drop(released);

        for (object, finalizer) in pending {
            self.run_finalizer(object, finalizer);
        }
        freed
    }

    /// Number of heap objects currently allocated, including the globals
    /// and registry tables.
    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }

    fn roots(&self) -> Vec<GcRef> {
        let mut roots = vec![self.globals, self.registry];
        roots.extend(self.stack.iter().filter_map(Value::gc_ref));
        for frame in &self.frames {
            roots.extend(frame.upvalues.iter().filter_map(Value::gc_ref));
        }
        roots
    }

    fn mark(&mut self, mut work: Vec<GcRef>) {
        let mut children = Vec::new();
        while let Some(r) = work.pop() {
            if self.heap.flags(r).contains(ObjectFlags::MARKED) {
                continue;
            }
            let Some(object) = self.heap.get(r) else {
                continue;
            };
            object.children(&mut children);
            self.heap.set_flags(r, ObjectFlags::MARKED, true);
            work.append(&mut children);
        }
    }

    /// `__gc` function of a userdata's metatable, if any.
    fn finalizer_of(&self, r: GcRef) -> Option<GcRef> {
        let metatable = self.heap.userdata(r)?.metatable?;
        match self.heap.table(metatable)?.get_str("__gc") {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Finalizer errors have nowhere to propagate and are discarded.
    fn run_finalizer(&mut self, object: GcRef, finalizer: GcRef) {
        self.push(Value::Function(finalizer));
        self.push(Value::Userdata(object));
        if self.pcall(1, 0).is_err() {
            self.pop(1);
        }
    }

    /// Run every outstanding finalizer, as when the session closes.
    fn finalize_all(&mut self) {
        let pending: Vec<(GcRef, GcRef)> = self
            .heap
            .live_refs()
            .into_iter()
            .filter(|r| !self.heap.flags(*r).contains(ObjectFlags::FINALIZED))
            .filter_map(|r| self.finalizer_of(r).map(|f| (r, f)))
            .collect();
        for (object, finalizer) in pending {
            self.heap.set_flags(object, ObjectFlags::FINALIZED, true);
            self.run_finalizer(object, finalizer);
        }
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.finalize_all();
    }
}
