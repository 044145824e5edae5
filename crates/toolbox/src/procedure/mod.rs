//! Procedure Units
//!
//! The contract between `#[procedure]` expansions and the rest of the crate:
//! a unit reports its identity, description and [`ProcedureSignature`], and
//! turns [`BoundArguments`] into a future producing JSON.

mod arg;
pub mod schema;

pub use arg::{ArgError, Json, ProcedureArg, Shared};

use mcpwire::{ProgressNotification, ProgressSender, ProgressToken, ToolContext};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::dependency::Dependency;

/// Errors a unit reports. The caller never sees them.
pub type ProcedureError = anyhow::Error;

pub type ProcedureFuture = Pin<Box<dyn Future<Output = Result<Value, ProcedureError>> + Send>>;

/// One declared parameter.
#[derive(Clone)]
pub struct ParameterSpec {
    pub name: &'static str,
    /// The Rust type as written in the declaration.
    pub type_name: &'static str,
    /// Caller-facing schema; `None` for handle types.
    pub schema: Option<Value>,
    /// `Option<T>` parameters.
    pub optional: bool,
    pub default: Option<Value>,
    check: fn(&Value) -> Result<(), ArgError>,
}

impl ParameterSpec {
    pub fn of<T: ProcedureArg>(
        name: &'static str,
        type_name: &'static str,
        default: Option<Value>,
    ) -> Self {
        Self {
            name,
            type_name,
            schema: T::schema(),
            optional: !T::required(),
            default,
            check: T::validate,
        }
    }

    /// Whether a caller value converts to this parameter's type.
    pub fn check(&self, value: &Value) -> Result<(), ArgError> {
        (self.check)(value)
    }

    pub fn is_required(&self) -> bool {
        !self.optional && self.default.is_none()
    }
}

impl std::fmt::Debug for ParameterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterSpec")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("schema", &self.schema)
            .field("optional", &self.optional)
            .field("default", &self.default)
            .finish()
    }
}

/// Ordered parameter list of a unit.
#[derive(Debug, Clone, Default)]
pub struct ProcedureSignature {
    parameters: Vec<ParameterSpec>,
}

impl ProcedureSignature {
    pub fn new(parameters: Vec<ParameterSpec>) -> Self {
        Self { parameters }
    }

    pub fn parameters(&self) -> &[ParameterSpec] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

/// Handle for reporting progress to the caller. Does nothing when the
/// caller did not ask for progress.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    token: Option<ProgressToken>,
    sender: Option<ProgressSender>,
}

impl Progress {
    pub fn new(token: Option<ProgressToken>, sender: Option<ProgressSender>) -> Self {
        Self { token, sender }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.sender.is_some()
    }

    /// Report `done` out of `total`.
    pub async fn report(&self, done: f64, total: f64, message: impl Into<String>) {
        if let (Some(token), Some(sender)) = (&self.token, &self.sender) {
            let notification = ProgressNotification::absolute(token.clone(), done, total, message);
            if sender.send(notification).await.is_err() {
                tracing::debug!("Progress receiver gone");
            }
        }
    }
}

/// Per-call context available to injected parameters.
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    session_id: Option<String>,
    progress: Progress,
}

impl CallScope {
    /// No session and no progress channel.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn from_context(context: ToolContext) -> Self {
        Self {
            session_id: Some(context.session_id),
            progress: Progress::new(context.progress_token, context.progress_sender),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }
}

/// A parameter could not be built from its bound value.
#[derive(Debug, Error)]
#[error("parameter '{parameter}': {source}")]
pub struct BindError {
    pub parameter: String,
    #[source]
    pub source: ArgError,
}

#[derive(Debug, Clone)]
enum Bound {
    User(Value),
    Injected(Arc<Dependency>),
}

/// Validated caller values merged with resolved dependencies.
#[derive(Debug, Default)]
pub struct BoundArguments {
    values: HashMap<String, Bound>,
    scope: CallScope,
}

impl BoundArguments {
    pub fn new(scope: CallScope) -> Self {
        Self {
            values: HashMap::new(),
            scope,
        }
    }

    pub fn user(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), Bound::User(value));
    }

    pub fn injected(&mut self, name: impl Into<String>, dependency: Arc<Dependency>) {
        self.values.insert(name.into(), Bound::Injected(dependency));
    }

    /// Move one parameter out, converted to its declared type. Absent
    /// parameters convert from `null`.
    pub fn take<T: ProcedureArg>(&mut self, name: &str) -> Result<T, BindError> {
        let converted = match self.values.remove(name) {
            Some(Bound::User(value)) => T::from_user(value),
            Some(Bound::Injected(dependency)) => T::from_dependency(&dependency, &self.scope),
            None => T::from_user(Value::Null),
        };

        converted.map_err(|source| BindError {
            parameter: name.to_string(),
            source,
        })
    }

    pub fn scope(&self) -> &CallScope {
        &self.scope
    }
}

/// A discoverable procedure. Implemented by `#[procedure]` expansions.
pub trait ProcedureUnit: Send + Sync + 'static {
    /// Function name as declared, e.g. `greeting_action`.
    fn identity(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn signature(&self) -> ProcedureSignature;

    /// Extract parameters and start the call. Extraction errors come back
    /// before anything runs.
    fn invoke(&self, arguments: BoundArguments) -> Result<ProcedureFuture, BindError>;
}

/// Return types a unit may declare.
pub trait IntoProcedureOutput {
    fn into_output(self) -> Result<Value, ProcedureError>;
}

impl<T, E> IntoProcedureOutput for Result<T, E>
where
    T: Serialize,
    E: Into<anyhow::Error>,
{
    fn into_output(self) -> Result<Value, ProcedureError> {
        let value = self.map_err(Into::into)?;
        Ok(serde_json::to_value(value)?)
    }
}

/// Link-time registration record submitted by `#[procedure]`.
pub struct ProcedureEntry {
    /// `module_path!()` of the declaration.
    pub module: &'static str,
    pub identity: &'static str,
    pub load: fn() -> Box<dyn ProcedureUnit>,
}

impl ProcedureEntry {
    pub const fn new(
        module: &'static str,
        identity: &'static str,
        load: fn() -> Box<dyn ProcedureUnit>,
    ) -> Self {
        Self {
            module,
            identity,
            load,
        }
    }
}

inventory::collect!(ProcedureEntry);
