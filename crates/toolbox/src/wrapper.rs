//! Tool Wrapper Factory
//!
//! A [`ToolWrapper`] is the callable form of one procedure unit: it checks
//! caller arguments against the classified signature, resolves injected
//! dependencies at call time, runs the unit and contains its failures.

use futures::FutureExt;
use mcpwire::{Tool, ToolSchema};
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::dependency::DependencyRegistry;
use crate::procedure::{BoundArguments, CallScope, ProcedureUnit};
use crate::signature::ClassifiedSignature;

/// Signature problems found while building a wrapper.
#[derive(Debug, Error)]
pub enum WrapperError {
    #[error("parameter '{parameter}' of type {type_name} has no schema and no registry key")]
    MissingSchema {
        parameter: String,
        type_name: String,
    },

    #[error("default for parameter '{parameter}' does not fit its type: {message}")]
    BadDefault { parameter: String, message: String },
}

/// Caller argument problems. Reported to the caller as invalid params.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("arguments must be an object")]
    NotAnObject,

    #[error("unexpected argument '{0}'")]
    Unexpected(String),

    #[error("missing required argument '{0}'")]
    Missing(String),

    #[error("invalid value for '{parameter}': {message}")]
    Type { parameter: String, message: String },
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The key name stays in the server log; callers get the incident id.
    #[error("Internal error (ref {incident})")]
    Dependency { incident: Uuid, key: String },

    #[error("procedure failed: {0:#}")]
    Execution(anyhow::Error),
}

/// Immutable, shareable wrapper around one unit.
#[derive(Clone)]
pub struct ToolWrapper {
    name: String,
    origin: String,
    unit: Arc<dyn ProcedureUnit>,
    signature: ClassifiedSignature,
    tool: Tool,
    registry: Arc<DependencyRegistry>,
}

impl std::fmt::Debug for ToolWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolWrapper")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .field("signature", &self.signature)
            .finish()
    }
}

impl ToolWrapper {
    /// Build the wrapper and its advertised [`Tool`].
    ///
    /// Every caller-supplied parameter needs a schema, and every declared
    /// default must convert to its parameter's type.
    pub fn build(
        public_name: impl Into<String>,
        unit: Arc<dyn ProcedureUnit>,
        signature: ClassifiedSignature,
        registry: Arc<DependencyRegistry>,
    ) -> Result<Self, WrapperError> {
        for param in signature.user_supplied() {
            if param.spec.schema.is_none() {
                return Err(WrapperError::MissingSchema {
                    parameter: param.spec.name.to_string(),
                    type_name: param.spec.type_name.to_string(),
                });
            }
            if let Some(default) = &param.spec.default {
                param.spec.check(default).map_err(|e| WrapperError::BadDefault {
                    parameter: param.spec.name.to_string(),
                    message: e.to_string(),
                })?;
            }
        }

        let name = public_name.into();
        let description = unit.description().trim();
        let mut tool = if description.is_empty() {
            Tool::bare(name.clone())
        } else {
            Tool::new(name.clone(), description)
        };
        tool = tool.with_input_schema(signature.input_schema());

        Ok(Self {
            origin: unit.identity().to_string(),
            name,
            unit,
            signature,
            tool,
            registry,
        })
    }

    /// Where the unit came from, for conflict reports.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn identity(&self) -> &'static str {
        self.unit.identity()
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn input_schema(&self) -> &ToolSchema {
        &self.tool.input_schema
    }

    pub fn signature(&self) -> &ClassifiedSignature {
        &self.signature
    }

    /// Check caller arguments and fill defaults. Returns one value per
    /// caller-supplied parameter.
    pub fn validate(&self, arguments: Value) -> Result<Map<String, Value>, ValidationError> {
        let mut supplied = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => return Err(ValidationError::NotAnObject),
        };

        // Registry values always win over caller values for injected names.
        let injected: Vec<&str> = self.signature.injected().map(|p| p.name()).collect();
        for name in injected {
            if supplied.remove(name).is_some() {
                tracing::warn!(
                    tool = %self.name,
                    parameter = name,
                    "Caller supplied an injected parameter; ignoring it"
                );
            }
        }

        if let Some(unknown) = supplied
            .keys()
            .find(|key| self.signature.get(key).is_none())
        {
            return Err(ValidationError::Unexpected(unknown.clone()));
        }

        let mut validated = Map::new();
        for param in self.signature.user_supplied() {
            let spec = &param.spec;
            let value = match supplied.remove(spec.name) {
                Some(value) => value,
                None => match (&spec.default, spec.optional) {
                    (Some(default), _) => default.clone(),
                    (None, true) => Value::Null,
                    (None, false) => return Err(ValidationError::Missing(spec.name.to_string())),
                },
            };

            spec.check(&value).map_err(|e| ValidationError::Type {
                parameter: spec.name.to_string(),
                message: e.to_string(),
            })?;

            validated.insert(spec.name.to_string(), value);
        }

        Ok(validated)
    }

    /// Validate, resolve, run.
    pub async fn invoke(&self, arguments: Value, scope: CallScope) -> Result<Value, InvokeError> {
        let span = tracing::info_span!(
            "toolbox.invoke",
            tool = %self.name,
            procedure = self.unit.identity(),
        );

        async move {
            let validated = self.validate(arguments)?;

            let mut bound = BoundArguments::new(scope);
            for (name, value) in validated {
                bound.user(name, value);
            }

            for param in self.signature.injected() {
                match self.registry.resolve(param.name()) {
                    Some(dependency) => bound.injected(param.name(), dependency),
                    None => return Err(self.dependency_error(param.name(), "not configured")),
                }
            }

            let started = std::panic::catch_unwind(AssertUnwindSafe(|| self.unit.invoke(bound)));
            let future = match started {
                Ok(Ok(future)) => future,
                Ok(Err(bind)) => {
                    let injected = self
                        .signature
                        .get(&bind.parameter)
                        .map(|p| p.is_injected())
                        .unwrap_or(false);
                    return Err(if injected {
                        self.dependency_error(&bind.parameter, &bind.source.to_string())
                    } else {
                        ValidationError::Type {
                            parameter: bind.parameter,
                            message: bind.source.to_string(),
                        }
                        .into()
                    });
                }
                Err(panic) => return Err(InvokeError::Execution(panic_error(panic))),
            };

            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error)) => Err(InvokeError::Execution(error)),
                Err(panic) => Err(InvokeError::Execution(panic_error(panic))),
            }
        }
        .instrument(span)
        .await
    }

    fn dependency_error(&self, key: &str, reason: &str) -> InvokeError {
        let incident = Uuid::new_v4();
        tracing::error!(
            tool = %self.name,
            key = %key,
            incident = %incident,
            reason = %reason,
            "Dependency resolution failed"
        );
        InvokeError::Dependency {
            incident,
            key: key.to_string(),
        }
    }
}

fn panic_error(panic: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("procedure panicked: {}", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Dependency;
    use crate::procedure::{ProcedureSignature, Progress};
    use crate::signature::classify;
    use crate::{procedure, ParameterSpec};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Only `test_validation_runs_before_unit` calls `strict_action`.
    static STRICT_CALLS: AtomicUsize = AtomicUsize::new(0);

    /// Look up a query with a key.
    #[procedure]
    async fn lookup_action(query: String, api_key: String) -> anyhow::Result<Value> {
        Ok(json!({ "query": query, "api_key": api_key }))
    }

    #[procedure]
    async fn strict_action(query: String, api_key: String) -> anyhow::Result<String> {
        STRICT_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}:{}", query, api_key.len()))
    }

    #[procedure(defaults(times = 2))]
    async fn repeat_action(word: String, times: u32, suffix: Option<String>) -> anyhow::Result<String> {
        Ok(format!("{}{}", word.repeat(times as usize), suffix.unwrap_or_default()))
    }

    #[procedure]
    async fn explode_action(mode: String) -> anyhow::Result<String> {
        match mode.as_str() {
            "panic" => panic!("kaboom"),
            _ => anyhow::bail!("refused: {}", mode),
        }
    }

    #[procedure]
    async fn handle_action(progress: Progress) -> anyhow::Result<bool> {
        Ok(progress.is_enabled())
    }

    fn wrap(unit: Box<dyn ProcedureUnit>, registry: DependencyRegistry) -> ToolWrapper {
        let registry = Arc::new(registry);
        let unit: Arc<dyn ProcedureUnit> = Arc::from(unit);
        let classified = classify(&unit.signature(), &registry);
        let name = crate::public_name(unit.identity()).to_string();
        ToolWrapper::build(name, unit, classified, registry).unwrap()
    }

    fn api_key_registry() -> DependencyRegistry {
        DependencyRegistry::builder()
            .bind("api_key", Dependency::secret("secret123"))
            .build()
    }

    #[tokio::test]
    async fn test_lookup_receives_injected_key() {
        let wrapper = wrap(Box::new(__procedure_lookup_action), api_key_registry());

        assert_eq!(wrapper.name(), "lookup");
        let names: Vec<_> = wrapper.input_schema().property_names().collect();
        assert_eq!(names, vec!["query"]);
        assert_eq!(wrapper.tool().description.as_deref(), Some("Look up a query with a key."));

        let out = wrapper
            .invoke(json!({ "query": "rust" }), CallScope::detached())
            .await
            .unwrap();
        assert_eq!(out, json!({ "query": "rust", "api_key": "secret123" }));
    }

    #[tokio::test]
    async fn test_caller_cannot_override_injected() {
        let wrapper = wrap(Box::new(__procedure_lookup_action), api_key_registry());
        let out = wrapper
            .invoke(json!({ "query": "q", "api_key": "forged" }), CallScope::detached())
            .await
            .unwrap();
        assert_eq!(out["api_key"], "secret123");
    }

    #[tokio::test]
    async fn test_validation_runs_before_unit() {
        let wrapper = wrap(Box::new(__procedure_strict_action), api_key_registry());

        let err = wrapper.invoke(json!({}), CallScope::detached()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Validation(ValidationError::Missing(ref p)) if p == "query"));

        let err = wrapper
            .invoke(json!({ "query": "q", "extra": 1 }), CallScope::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Validation(ValidationError::Unexpected(ref p)) if p == "extra"));

        let err = wrapper
            .invoke(json!({ "query": 42 }), CallScope::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Validation(ValidationError::Type { .. })));

        let err = wrapper.invoke(json!([1]), CallScope::detached()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Validation(ValidationError::NotAnObject)));

        assert_eq!(STRICT_CALLS.load(Ordering::SeqCst), 0);

        let out = wrapper.invoke(json!({ "query": "q" }), CallScope::detached()).await.unwrap();
        assert_eq!(out, json!("q:9"));
        assert_eq!(STRICT_CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_defaults_and_optionals() {
        let wrapper = wrap(Box::new(__procedure_repeat_action), DependencyRegistry::empty());

        assert_eq!(wrapper.input_schema().required, vec!["word".to_string()]);
        assert_eq!(wrapper.input_schema().properties["times"]["default"], 2);

        let out = wrapper.invoke(json!({ "word": "ab" }), CallScope::detached()).await.unwrap();
        assert_eq!(out, json!("abab"));

        let out = wrapper
            .invoke(json!({ "word": "x", "times": 3, "suffix": "!" }), CallScope::detached())
            .await
            .unwrap();
        assert_eq!(out, json!("xxx!"));

        let out = wrapper.invoke(Value::Null, CallScope::detached()).await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn test_missing_dependency_hides_key() {
        let registry = DependencyRegistry::builder().slot("api_key").build();
        let wrapper = wrap(Box::new(__procedure_lookup_action), registry);

        let err = wrapper
            .invoke(json!({ "query": "q" }), CallScope::detached())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("Internal error (ref "));
        assert!(!message.contains("api_key"));
        assert!(matches!(err, InvokeError::Dependency { ref key, .. } if key == "api_key"));
    }

    #[tokio::test]
    async fn test_rotation_seen_by_next_call() {
        let registry = Arc::new(api_key_registry());
        let unit: Arc<dyn ProcedureUnit> = Arc::new(__procedure_lookup_action);
        let classified = classify(&unit.signature(), &registry);
        let wrapper = ToolWrapper::build("lookup", unit, classified, Arc::clone(&registry)).unwrap();

        registry.rotate("api_key", Dependency::secret("rotated")).unwrap();

        let out = wrapper
            .invoke(json!({ "query": "q" }), CallScope::detached())
            .await
            .unwrap();
        assert_eq!(out["api_key"], "rotated");
    }

    #[tokio::test]
    async fn test_failures_and_panics_are_contained() {
        let wrapper = wrap(Box::new(__procedure_explode_action), DependencyRegistry::empty());

        let err = wrapper
            .invoke(json!({ "mode": "err" }), CallScope::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Execution(_)));

        let err = wrapper
            .invoke(json!({ "mode": "panic" }), CallScope::detached())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("kaboom"));

        // The wrapper is still usable.
        let err = wrapper
            .invoke(json!({ "mode": "again" }), CallScope::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::Execution(_)));
    }

    #[tokio::test]
    async fn test_wrong_dependency_kind_is_dependency_error() {
        let registry = DependencyRegistry::builder()
            .bind("progress", Dependency::value("not a channel"))
            .build();
        let wrapper = wrap(Box::new(__procedure_handle_action), registry);

        let err = wrapper.invoke(json!({}), CallScope::detached()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Dependency { .. }));
    }

    #[test]
    fn test_handle_without_key_cannot_build() {
        let unit: Arc<dyn ProcedureUnit> = Arc::new(__procedure_handle_action);
        let registry = Arc::new(DependencyRegistry::empty());
        let classified = classify(&unit.signature(), &registry);

        let err = ToolWrapper::build("handle", unit, classified, registry).unwrap_err();
        assert!(matches!(err, WrapperError::MissingSchema { ref parameter, .. } if parameter == "progress"));
    }

    #[test]
    fn test_bad_default_cannot_build() {
        struct Bad;
        impl ProcedureUnit for Bad {
            fn identity(&self) -> &'static str {
                "bad_action"
            }
            fn description(&self) -> &'static str {
                ""
            }
            fn signature(&self) -> ProcedureSignature {
                ProcedureSignature::new(vec![ParameterSpec::of::<u32>("n", "u32", Some(json!("three")))])
            }
            fn invoke(&self, _: BoundArguments) -> Result<crate::ProcedureFuture, crate::BindError> {
                Ok(Box::pin(async { Ok(Value::Null) }))
            }
        }

        let unit: Arc<dyn ProcedureUnit> = Arc::new(Bad);
        let registry = Arc::new(DependencyRegistry::empty());
        let classified = classify(&unit.signature(), &registry);
        assert!(matches!(
            ToolWrapper::build("bad", unit, classified, registry),
            Err(WrapperError::BadDefault { .. })
        ));
    }
}
