//! Registration Surface
//!
//! The frozen set of published tools, and the `mcpwire` handler that serves
//! it.

use async_trait::async_trait;
use mcpwire::{CallToolResult, ErrorData, Handler, Implementation, Tool, ToolContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::procedure::CallScope;
use crate::wrapper::{InvokeError, ToolWrapper};

/// Two units claimed the same public name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("tool name '{name}' registered twice: {first} and {second}")]
pub struct RegistrationConflict {
    pub name: String,
    pub first: String,
    pub second: String,
}

#[derive(Debug, Default)]
pub struct SurfaceBuilder {
    tools: BTreeMap<String, ToolWrapper>,
}

impl SurfaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, wrapper: ToolWrapper) -> Result<&mut Self, RegistrationConflict> {
        if let Some(existing) = self.tools.get(wrapper.name()) {
            return Err(RegistrationConflict {
                name: wrapper.name().to_string(),
                first: existing.origin().to_string(),
                second: wrapper.origin().to_string(),
            });
        }
        tracing::debug!(tool = wrapper.name(), origin = wrapper.origin(), "Published tool");
        self.tools.insert(wrapper.name().to_string(), wrapper);
        Ok(self)
    }

    pub fn publish_all(
        &mut self,
        wrappers: impl IntoIterator<Item = ToolWrapper>,
    ) -> Result<&mut Self, RegistrationConflict> {
        for wrapper in wrappers {
            self.publish(wrapper)?;
        }
        Ok(self)
    }

    pub fn build(self) -> RegistrationSurface {
        let catalog = self.tools.values().map(|w| w.tool().clone()).collect();
        RegistrationSurface {
            tools: self.tools,
            catalog,
        }
    }
}

/// Published tools by public name. Never changes after build.
#[derive(Debug, Default)]
pub struct RegistrationSurface {
    tools: BTreeMap<String, ToolWrapper>,
    catalog: Vec<Tool>,
}

impl RegistrationSurface {
    pub fn builder() -> SurfaceBuilder {
        SurfaceBuilder::new()
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolWrapper> {
        self.tools.get(name)
    }

    /// Ordered by name.
    pub fn catalog(&self) -> &[Tool] {
        &self.catalog
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Serves a [`RegistrationSurface`] over MCP.
pub struct ToolboxHandler {
    surface: Arc<RegistrationSurface>,
    info: Implementation,
    instructions: Option<String>,
}

impl ToolboxHandler {
    pub fn new(surface: Arc<RegistrationSurface>, info: Implementation) -> Self {
        Self {
            surface,
            info,
            instructions: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn surface(&self) -> &Arc<RegistrationSurface> {
        &self.surface
    }

    async fn run(&self, name: &str, arguments: Value, scope: CallScope) -> Result<CallToolResult, ErrorData> {
        let wrapper = self
            .surface
            .lookup(name)
            .ok_or_else(|| ErrorData::tool_not_found(name))?;

        match wrapper.invoke(arguments, scope).await {
            Ok(value) => Ok(to_call_result(value)),
            Err(InvokeError::Validation(e)) => Err(ErrorData::invalid_params(e.to_string())),
            Err(e @ InvokeError::Dependency { .. }) => Err(ErrorData::internal_error(e.to_string())),
            Err(InvokeError::Execution(e)) => {
                tracing::error!(tool = name, error = ?e, "Tool execution failed");
                Ok(CallToolResult::error("Tool execution failed"))
            }
        }
    }
}

fn to_call_result(value: Value) -> CallToolResult {
    match value {
        Value::String(text) => CallToolResult::text(text),
        other => {
            let text = serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string());
            CallToolResult::text(text).with_structured(other)
        }
    }
}

#[async_trait]
impl Handler for ToolboxHandler {
    fn tools(&self) -> Vec<Tool> {
        self.surface.catalog().to_vec()
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ErrorData> {
        self.run(name, arguments, CallScope::detached()).await
    }

    async fn call_tool_with_context(
        &self,
        name: &str,
        arguments: Value,
        context: ToolContext,
    ) -> Result<CallToolResult, ErrorData> {
        self.run(name, arguments, CallScope::from_context(context)).await
    }

    fn server_info(&self) -> Implementation {
        self.info.clone()
    }

    fn instructions(&self) -> Option<String> {
        self.instructions.clone()
    }
}
