//! A small stack-based scripting VM.
//!
//! `ltl-vm` provides the state a host binding layer talks to: a value stack
//! addressed by relative indices, tables with metatables, native closures
//! with upvalues, full and light userdata, a registry of named metatables,
//! and a mark and sweep collector that runs `__gc` finalizers.
//!
//! There is no parser or bytecode interpreter. Every function is native.
//!
//! # Example
//!
//! ```
//! use ltl_vm::{ScriptError, Vm};
//!
//! let mut vm = Vm::new();
//! vm.push_function(|vm: &mut Vm| -> Result<i32, ScriptError> {
//!     let n = vm.to_integer(1);
//!     vm.push_integer(n * 2);
//!     Ok(1)
//! });
//! vm.push_integer(21);
//! vm.call(1, 1).unwrap();
//! assert_eq!(vm.to_integer(-1), 42);
//! ```

mod error;
mod function;
mod gc;
mod heap;
mod value;
mod vm;

pub use error::ScriptError;
pub use function::{NativeCallable, NativeFn};
pub use heap::GcRef;
pub use value::{Value, VmType};
pub use vm::{MULTRET, Vm, VmConfig, VmId};
