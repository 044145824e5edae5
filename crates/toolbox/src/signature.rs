//! Signature Analyzer
//!
//! Splits a unit's parameters into the ones callers supply and the ones the
//! registry injects. Classification is a lookup by name; nothing is
//! resolved here.

use mcpwire::ToolSchema;
use serde_json::Value;

use crate::dependency::DependencyRegistry;
use crate::procedure::{ParameterSpec, ProcedureSignature};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterClass {
    UserSupplied,
    Injected,
}

#[derive(Debug, Clone)]
pub struct ClassifiedParameter {
    pub spec: ParameterSpec,
    pub class: ParameterClass,
}

impl ClassifiedParameter {
    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn is_injected(&self) -> bool {
        self.class == ParameterClass::Injected
    }
}

/// A signature with every parameter classified, in declared order.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedSignature {
    parameters: Vec<ClassifiedParameter>,
}

/// Classify each parameter of `signature` against the registry's key set.
///
/// A parameter whose name is a registry key is Injected even when its type
/// could be supplied by callers: the registry takes precedence, and the
/// parameter disappears from the advertised schema.
pub fn classify(signature: &ProcedureSignature, registry: &DependencyRegistry) -> ClassifiedSignature {
    let parameters = signature
        .parameters()
        .iter()
        .map(|spec| {
            let class = if registry.contains(spec.name) {
                if spec.schema.is_some() {
                    tracing::debug!(
                        parameter = spec.name,
                        type_name = spec.type_name,
                        "Registry key shadows a caller-suppliable parameter"
                    );
                } else {
                    tracing::debug!(parameter = spec.name, "Injected parameter");
                }
                ParameterClass::Injected
            } else {
                ParameterClass::UserSupplied
            };

            ClassifiedParameter {
                spec: spec.clone(),
                class,
            }
        })
        .collect();

    ClassifiedSignature { parameters }
}

impl ClassifiedSignature {
    pub fn parameters(&self) -> &[ClassifiedParameter] {
        &self.parameters
    }

    pub fn get(&self, name: &str) -> Option<&ClassifiedParameter> {
        self.parameters.iter().find(|p| p.spec.name == name)
    }

    pub fn user_supplied(&self) -> impl Iterator<Item = &ClassifiedParameter> {
        self.parameters.iter().filter(|p| !p.is_injected())
    }

    pub fn injected(&self) -> impl Iterator<Item = &ClassifiedParameter> {
        self.parameters.iter().filter(|p| p.is_injected())
    }

    /// The advertised input schema: caller-supplied parameters only, in
    /// declared order, defaults recorded on their properties.
    pub fn input_schema(&self) -> ToolSchema {
        self.user_supplied()
            .fold(ToolSchema::empty(), |schema, param| {
                let mut property = param.spec.schema.clone().unwrap_or(Value::Object(Default::default()));
                if let (Some(default), Value::Object(map)) = (&param.spec.default, &mut property) {
                    map.insert("default".to_string(), default.clone());
                }
                schema.with_property(param.spec.name, property, param.spec.is_required())
            })
    }
}
