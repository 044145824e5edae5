//! toolbox - discovery and dispatch of procedure units as MCP tools
//!
//! A procedure unit is an ordinary function annotated with [`procedure`].
//! The attribute records the function's signature and submits it to a
//! link-time collection; at startup [`discover`] walks that collection for a
//! namespace, works out which parameters callers supply and which come from
//! the [`DependencyRegistry`], and builds one [`ToolWrapper`] per unit.
//! Wrappers are published on a [`RegistrationSurface`], which
//! [`ToolboxHandler`] serves over `mcpwire`.
//!
//! ```rust,ignore
//! use toolbox::procedure;
//!
//! /// Look something up.
//! #[procedure]
//! pub async fn lookup_action(query: String, api_key: String) -> anyhow::Result<String> {
//!     // `api_key` is a registry key, so callers never see it.
//!     Ok(format!("{query} via {}", api_key.len()))
//! }
//! ```
//!
//! Requests reach the surface only through [`AuthGate`].

// Lets `#[procedure]` expansions name `::toolbox` inside this crate's tests.
extern crate self as toolbox;

pub mod auth;
pub mod dependency;
pub mod discovery;
pub mod procedure;
pub mod signature;
pub mod surface;
pub mod wrapper;

pub use toolbox_macros::procedure;

pub use auth::{require_api_key, AuthContext, AuthError, AuthGate, AuthOutcome, HEALTH_PATH};
pub use dependency::{Dependency, DependencyRegistry, RegistryBuilder, RegistryError, SecretString};
pub use discovery::{discover, public_name, Discovery, DiscoveryError};
pub use procedure::{
    ArgError, BindError, BoundArguments, CallScope, IntoProcedureOutput, Json, ParameterSpec,
    ProcedureArg, ProcedureEntry, ProcedureError, ProcedureFuture, ProcedureSignature,
    ProcedureUnit, Progress, Shared,
};
pub use signature::{classify, ClassifiedParameter, ClassifiedSignature, ParameterClass};
pub use surface::{RegistrationConflict, RegistrationSurface, SurfaceBuilder, ToolboxHandler};
pub use wrapper::{InvokeError, ToolWrapper, ValidationError, WrapperError};

/// Items the `#[procedure]` expansion refers to. Not public API.
#[doc(hidden)]
pub mod __private {
    pub use inventory;
    pub use serde_json;
}
