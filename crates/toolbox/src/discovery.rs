//! Discovery Loader
//!
//! Walks the link-time [`ProcedureEntry`] collection for one namespace and
//! builds a [`ToolWrapper`] per unit. A module with any unit that cannot be
//! loaded is skipped whole; the rest still load.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;

use crate::dependency::DependencyRegistry;
use crate::procedure::{ProcedureEntry, ProcedureSignature, ProcedureUnit};
use crate::signature::classify;
use crate::wrapper::ToolWrapper;

const ACTION_SUFFIX: &str = "_action";

/// A module that was skipped and why.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("module {module} skipped: {identity} failed to load: {reason}")]
pub struct DiscoveryError {
    pub module: String,
    /// The unit that failed.
    pub identity: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub wrappers: Vec<ToolWrapper>,
    pub failures: Vec<DiscoveryError>,
}

/// Public tool name for a unit identity: the `_action` suffix removed.
pub fn public_name(identity: &str) -> &str {
    identity.strip_suffix(ACTION_SUFFIX).unwrap_or(identity)
}

fn in_namespace(module: &str, namespace: &str) -> bool {
    module == namespace
        || module
            .strip_prefix(namespace)
            .is_some_and(|rest| rest.starts_with("::"))
}

/// Discover every unit under `namespace`. Deterministic: modules and
/// identities are visited in sorted order.
pub fn discover(namespace: &str, registry: &Arc<DependencyRegistry>) -> Discovery {
    let mut modules: BTreeMap<&'static str, Vec<&'static ProcedureEntry>> = BTreeMap::new();

    for entry in inventory::iter::<ProcedureEntry> {
        if !in_namespace(entry.module, namespace) {
            continue;
        }
        if !entry.identity.ends_with(ACTION_SUFFIX) {
            tracing::trace!(
                module = entry.module,
                identity = entry.identity,
                "Not an action; skipping"
            );
            continue;
        }
        modules.entry(entry.module).or_default().push(entry);
    }

    let mut discovery = Discovery::default();

    for (module, mut entries) in modules {
        entries.sort_by_key(|e| e.identity);

        match load_module(&entries, registry) {
            Ok(wrappers) => {
                tracing::debug!(module, tools = wrappers.len(), "Loaded module");
                discovery.wrappers.extend(wrappers);
            }
            Err((identity, reason)) => {
                let failure = DiscoveryError {
                    module: module.to_string(),
                    identity: identity.to_string(),
                    reason,
                };
                tracing::error!(
                    module = %failure.module,
                    identity = %failure.identity,
                    reason = %failure.reason,
                    "Skipping module"
                );
                discovery.failures.push(failure);
            }
        }
    }

    tracing::info!(
        namespace,
        tools = discovery.wrappers.len(),
        skipped_modules = discovery.failures.len(),
        "Discovery complete"
    );

    discovery
}

fn load_module(
    entries: &[&'static ProcedureEntry],
    registry: &Arc<DependencyRegistry>,
) -> Result<Vec<ToolWrapper>, (&'static str, String)> {
    entries
        .iter()
        .map(|entry| load_unit(entry, registry).map_err(|reason| (entry.identity, reason)))
        .collect()
}

fn load_unit(entry: &ProcedureEntry, registry: &Arc<DependencyRegistry>) -> Result<ToolWrapper, String> {
    let loaded = std::panic::catch_unwind(AssertUnwindSafe(
        || -> (Box<dyn ProcedureUnit>, ProcedureSignature) {
            let unit = (entry.load)();
            let signature = unit.signature();
            (unit, signature)
        },
    ));
    let (unit, signature) = loaded.map_err(|_| "panicked while loading".to_string())?;

    let unit: Arc<dyn ProcedureUnit> = Arc::from(unit);
    let classified = classify(&signature, registry);

    ToolWrapper::build(public_name(entry.identity), unit, classified, Arc::clone(registry))
        .map(|wrapper| wrapper.with_origin(format!("{}::{}", entry.module, entry.identity)))
        .map_err(|e| e.to_string())
}
