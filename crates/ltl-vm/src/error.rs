//! Error types raised by the VM.

use thiserror::Error;

/// Errors visible to script code.
///
/// Anything a native function returns as `Err` unwinds to the nearest
/// protected call, exactly like a script-level `error()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// A runtime error carrying a message
    #[error("{0}")]
    Runtime(String),

    /// Attempted to call a value that is not a function
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    /// Attempted to index a value that has no table semantics
    #[error("attempt to index a {0} value")]
    NotIndexable(&'static str),

    /// Attempted to replace a metatable guarded by `__metatable`
    #[error("cannot change a protected metatable")]
    ProtectedMetatable,

    /// Nested native calls exceeded the configured depth
    #[error("stack overflow (call depth exceeds {limit})")]
    StackOverflow { limit: usize },
}

impl ScriptError {
    /// Create a runtime error with a message.
    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }
}
