//! Conversion of call arguments into parameter types.
//!
//! Every parameter type of a procedure unit implements [`ProcedureArg`]. The
//! trait answers two questions: can callers supply this parameter (it has a
//! schema), and how is a value built from caller JSON or from a registry
//! dependency.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;
use thiserror::Error;

use super::schema::schema_for;
use super::{CallScope, Progress};
use crate::dependency::{Dependency, SecretString};

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("{0}")]
    Type(String),

    #[error("this parameter cannot be supplied by callers")]
    NotUserSupplied,

    #[error("expected a {expected} dependency, found a {found}")]
    DependencyMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

impl ArgError {
    fn from_serde(error: serde_json::Error) -> Self {
        Self::Type(error.to_string())
    }
}

/// A type usable as a procedure parameter.
pub trait ProcedureArg: Sized + Send + 'static {
    /// Caller-facing schema. `None` marks a handle type that only the
    /// registry can provide.
    fn schema() -> Option<Value>;

    /// Whether the parameter must be present when it has no default.
    fn required() -> bool {
        true
    }

    fn from_user(value: Value) -> Result<Self, ArgError>;

    fn from_dependency(dependency: &Dependency, scope: &CallScope) -> Result<Self, ArgError>;

    /// Check a caller value without keeping the result.
    fn validate(value: &Value) -> Result<(), ArgError> {
        Self::from_user(value.clone()).map(|_| ())
    }
}

/// Secrets inject as their plain string so ordinary `String` parameters can
/// receive them.
fn dependency_json(dependency: &Dependency) -> Result<Value, ArgError> {
    match dependency {
        Dependency::Value(value) => Ok(value.clone()),
        Dependency::Secret(secret) => Ok(Value::String(secret.expose().to_string())),
        other => Err(ArgError::DependencyMismatch {
            expected: "value",
            found: other.kind(),
        }),
    }
}

macro_rules! impl_json_arg {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ProcedureArg for $ty {
                fn schema() -> Option<Value> {
                    Some(schema_for::<$ty>())
                }

                fn from_user(value: Value) -> Result<Self, ArgError> {
                    serde_json::from_value(value).map_err(ArgError::from_serde)
                }

                fn from_dependency(dependency: &Dependency, _scope: &CallScope) -> Result<Self, ArgError> {
                    Self::from_user(dependency_json(dependency)?)
                }
            }
        )*
    };
}

impl_json_arg!(
    String, bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, Value,
);

impl<T> ProcedureArg for Vec<T>
where
    T: DeserializeOwned + JsonSchema + Send + 'static,
{
    fn schema() -> Option<Value> {
        Some(schema_for::<Vec<T>>())
    }

    fn from_user(value: Value) -> Result<Self, ArgError> {
        serde_json::from_value(value).map_err(ArgError::from_serde)
    }

    fn from_dependency(dependency: &Dependency, _scope: &CallScope) -> Result<Self, ArgError> {
        Self::from_user(dependency_json(dependency)?)
    }
}

/// Optional parameters: absent or `null` becomes `None`.
impl<T: ProcedureArg> ProcedureArg for Option<T> {
    fn schema() -> Option<Value> {
        T::schema()
    }

    fn required() -> bool {
        false
    }

    fn from_user(value: Value) -> Result<Self, ArgError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_user(other).map(Some),
        }
    }

    fn from_dependency(dependency: &Dependency, scope: &CallScope) -> Result<Self, ArgError> {
        T::from_dependency(dependency, scope).map(Some)
    }
}

/// Any deserializable type with a schema, e.g. a request struct.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T> Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> ProcedureArg for Json<T>
where
    T: DeserializeOwned + JsonSchema + Send + 'static,
{
    fn schema() -> Option<Value> {
        Some(schema_for::<T>())
    }

    fn from_user(value: Value) -> Result<Self, ArgError> {
        serde_json::from_value(value)
            .map(Json)
            .map_err(ArgError::from_serde)
    }

    fn from_dependency(dependency: &Dependency, _scope: &CallScope) -> Result<Self, ArgError> {
        Self::from_user(dependency_json(dependency)?)
    }
}

/// Registry-only: callers can never pass a secret in.
impl ProcedureArg for SecretString {
    fn schema() -> Option<Value> {
        None
    }

    fn from_user(_value: Value) -> Result<Self, ArgError> {
        Err(ArgError::NotUserSupplied)
    }

    fn from_dependency(dependency: &Dependency, _scope: &CallScope) -> Result<Self, ArgError> {
        match dependency {
            Dependency::Secret(secret) => Ok(secret.clone()),
            Dependency::Value(Value::String(s)) => Ok(SecretString::new(s.clone())),
            other => Err(ArgError::DependencyMismatch {
                expected: "secret",
                found: other.kind(),
            }),
        }
    }
}

/// A shared handle from the registry, e.g. `Shared<reqwest::Client>`.
pub struct Shared<T>(pub Arc<T>);

impl<T> Deref for Shared<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Any + Send + Sync> ProcedureArg for Shared<T> {
    fn schema() -> Option<Value> {
        None
    }

    fn from_user(_value: Value) -> Result<Self, ArgError> {
        Err(ArgError::NotUserSupplied)
    }

    fn from_dependency(dependency: &Dependency, _scope: &CallScope) -> Result<Self, ArgError> {
        match dependency {
            Dependency::Shared(handle) => Arc::clone(handle)
                .downcast::<T>()
                .map(Shared)
                .map_err(|_| ArgError::DependencyMismatch {
                    expected: std::any::type_name::<T>(),
                    found: "shared handle of another type",
                }),
            other => Err(ArgError::DependencyMismatch {
                expected: "shared handle",
                found: other.kind(),
            }),
        }
    }
}

impl ProcedureArg for Progress {
    fn schema() -> Option<Value> {
        None
    }

    fn from_user(_value: Value) -> Result<Self, ArgError> {
        Err(ArgError::NotUserSupplied)
    }

    fn from_dependency(dependency: &Dependency, scope: &CallScope) -> Result<Self, ArgError> {
        match dependency {
            Dependency::Progress => Ok(scope.progress().clone()),
            other => Err(ArgError::DependencyMismatch {
                expected: "progress channel",
                found: other.kind(),
            }),
        }
    }
}
