//! Typed bindings between native Rust values and the `ltl-vm` stack.
//!
//! Two layers:
//!
//! * **Marshalling.** [`stack_api`] pushes, reads, type-checks and names
//!   values through per-type policies chosen at compile time
//!   ([`stack_core`]). [`sandbox::check`] layers typed errors on top.
//! * **Object bridging.** [`registration`] exposes native classes and
//!   functions to scripts. Instances live in VM-owned boxes and are
//!   released exactly once, by the collector's finalizer or explicitly.
//!
//! ```
//! use ltl::prelude::*;
//!
//! struct Point { x: i32, y: i32 }
//! impl NativeType for Point {}
//!
//! let mut vm = Vm::new();
//! register_class::<Point>(&mut vm, "Point")
//!     .add_ctor(|x: i32, y: i32| Point { x, y })
//!     .add_function("sum", |p: &Point| p.x + p.y)
//!     .finish()
//!     .unwrap();
//!
//! // Point.new(2, 4):sum()
//! vm.get_global("Point");
//! vm.get_field(-1, "new").unwrap();
//! push(&mut vm, (2, 4));
//! vm.call(2, 1).unwrap();
//! vm.get_field(-1, "sum").unwrap();
//! vm.push_value(-2);
//! vm.call(1, 1).unwrap();
//! assert_eq!(cast::<i32>(&vm, -1), 6);
//! ```

pub mod error;
pub mod handle;
pub mod registration;
pub mod sandbox;
pub mod stack_api;
pub mod stack_core;
pub mod stack_view;
pub mod userdata;
pub mod util;

pub use ltl_vm;

pub use error::{BridgeError, LifecycleError, TypeError};
pub use handle::{Func, Ref, StackRef};
pub use registration::{
    ClassRegistrar, IntoResults, LibraryRegistrar, NewInstance, register_class, register_library,
};
pub use sandbox::{CheckArg, Sandbox, check};
pub use stack_view::StackView;
pub use userdata::{
    Instance, InstanceState, NativeType, Userdata, allocate_userdata, create_userdata,
    registered_name,
};

pub mod prelude {
    pub use crate::error::*;
    pub use crate::handle::*;
    pub use crate::registration::{
        ClassRegistrar, IntoCtor, IntoFunction, IntoMethod, IntoResults, LibraryRegistrar,
        NewInstance, register_class, register_library,
    };
    pub use crate::sandbox::*;
    pub use crate::stack_api::*;
    pub use crate::stack_view::*;
    pub use crate::userdata::*;
    pub use ltl_vm::{MULTRET, ScriptError, Vm, VmType};
}
