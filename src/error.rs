//! Error types for the binding layer.

use ltl_vm::ScriptError;
use thiserror::Error;

/// Checked extraction found a value of the wrong type.
///
/// Both names are diagnostic labels: the expected side comes from the
/// target type's name policy, the actual side is the VM type name of the
/// slot (`"no value"` for an index outside the frame).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("TypeError: expected {expected}, got {actual}")]
pub struct TypeError {
    pub expected: String,
    pub actual: String,
}

impl TypeError {
    pub fn new(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Invalid transition of a boxed native instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The box was allocated but never given a value
    #[error("instance holds no value")]
    Empty,

    /// Tried to store a value into a box that already owns one
    #[error("instance already owns a value")]
    AlreadyOwned,

    /// The finalizer already released the native value
    #[error("instance has already been finalized")]
    AlreadyFinalized,
}

/// Errors raised by the binding layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Checked extraction failed
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A handle was used against the wrong session or a slot that no longer
    /// holds its object
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// Boxed instance state did not allow the operation
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A native type was used before `register_class` named it
    #[error("type {type_name} is not registered with this session")]
    Unregistered { type_name: &'static str },

    /// `register_class` was given a name another native type already holds
    #[error("class name '{name}' is already registered to type {owner}")]
    NameTaken { name: String, owner: String },

    /// An error raised by the VM itself
    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl BridgeError {
    pub fn invalid_handle(message: impl Into<String>) -> Self {
        BridgeError::InvalidHandle(message.into())
    }
}

impl From<TypeError> for ScriptError {
    fn from(err: TypeError) -> Self {
        ScriptError::Runtime(err.to_string())
    }
}

impl From<LifecycleError> for ScriptError {
    fn from(err: LifecycleError) -> Self {
        ScriptError::Runtime(err.to_string())
    }
}

/// Errors crossing back into the VM become script errors, so scripts can
/// catch them with a protected call.
impl From<BridgeError> for ScriptError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Script(inner) => inner,
            other => ScriptError::Runtime(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_error_names_both_sides() {
        let err = TypeError::new("integer", "string");
        assert_eq!(err.to_string(), "TypeError: expected integer, got string");
    }

    #[test]
    fn type_error_becomes_runtime_script_error() {
        let err: ScriptError = TypeError::new("boolean", "nil").into();
        assert_eq!(
            err,
            ScriptError::runtime("TypeError: expected boolean, got nil")
        );
    }

    #[test]
    fn script_errors_pass_through_unchanged() {
        let err: ScriptError = BridgeError::Script(ScriptError::ProtectedMetatable).into();
        assert_eq!(err, ScriptError::ProtectedMetatable);
    }

    #[test]
    fn bridge_error_wraps_lifecycle() {
        let err = BridgeError::from(LifecycleError::AlreadyFinalized);
        assert!(matches!(
            err,
            BridgeError::Lifecycle(LifecycleError::AlreadyFinalized)
        ));
        assert!(err.to_string().contains("finalized"));
    }

    #[test]
    fn unregistered_names_the_rust_type() {
        let err = BridgeError::Unregistered { type_name: "demo::Point" };
        assert!(err.to_string().contains("demo::Point"));
    }

    #[test]
    fn name_taken_names_class_and_owner() {
        let err = BridgeError::NameTaken {
            name: "Point".to_string(),
            owner: "demo::Point".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "class name 'Point' is already registered to type demo::Point"
        );
    }
}
