//! Dependency Registry
//!
//! Named values that procedure units receive without callers supplying them:
//! credentials, endpoint settings, shared clients, the per-call progress
//! channel. The key set is fixed when the registry is built; values behind a
//! key can be swapped at runtime with [`DependencyRegistry::rotate`].

use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// A string that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A value bound to a registry key.
#[derive(Clone)]
pub enum Dependency {
    /// Plain configuration.
    Value(Value),
    Secret(SecretString),
    /// A long-lived handle, e.g. an HTTP client. Units take it as `Shared<T>`.
    Shared(Arc<dyn Any + Send + Sync>),
    /// Stands in for the caller's progress channel, bound per call.
    Progress,
}

impl Dependency {
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    pub fn secret(value: impl Into<SecretString>) -> Self {
        Self::Secret(value.into())
    }

    pub fn shared<T: Any + Send + Sync>(handle: T) -> Self {
        Self::Shared(Arc::new(handle))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Secret(_) => "secret",
            Self::Shared(_) => "shared handle",
            Self::Progress => "progress channel",
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Secret(s) => f.debug_tuple("Secret").field(s).finish(),
            Self::Shared(_) => f.write_str("Shared(..)"),
            Self::Progress => f.write_str("Progress"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown dependency key '{0}'")]
    UnknownKey(String),
}

type Slot = RwLock<Option<Arc<Dependency>>>;

/// Fixed set of dependency keys, each holding an optional value.
pub struct DependencyRegistry {
    slots: BTreeMap<String, Slot>,
}

impl DependencyRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// A registry with no keys: every parameter is caller-supplied.
    pub fn empty() -> Self {
        Self {
            slots: BTreeMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current value for `name`. `None` for unknown keys and for keys that
    /// were declared but never given a value.
    pub fn resolve(&self, name: &str) -> Option<Arc<Dependency>> {
        let slot = self.slots.get(name)?;
        let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Replace the value behind an existing key.
    ///
    /// Calls already holding the old `Arc` finish with it; the next resolve
    /// sees the new one.
    pub fn rotate(&self, name: &str, dependency: Dependency) -> Result<(), RegistryError> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| RegistryError::UnknownKey(name.to_string()))?;

        let fresh = Arc::new(dependency);
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(fresh);
        drop(guard);

        tracing::info!(key = %name, "Rotated dependency");
        Ok(())
    }

    /// Empty a slot, e.g. when a refreshed secret disappeared upstream.
    pub fn clear(&self, name: &str) -> Result<(), RegistryError> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| RegistryError::UnknownKey(name.to_string()))?;
        *slot.write().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

impl fmt::Debug for DependencyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, slot) in &self.slots {
            let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
            let kind = guard.as_ref().map(|d| d.kind()).unwrap_or("unset");
            map.entry(name, &kind);
        }
        map.finish()
    }
}

/// Declares the key set.
#[derive(Default)]
pub struct RegistryBuilder {
    slots: BTreeMap<String, Option<Dependency>>,
}

impl RegistryBuilder {
    /// Declare a key with no value yet.
    pub fn slot(mut self, name: impl Into<String>) -> Self {
        self.slots.entry(name.into()).or_insert(None);
        self
    }

    /// Declare a key and bind it.
    pub fn bind(mut self, name: impl Into<String>, dependency: Dependency) -> Self {
        self.slots.insert(name.into(), Some(dependency));
        self
    }

    /// Declare a key, binding it only if a value is present.
    pub fn bind_opt(self, name: impl Into<String>, dependency: Option<Dependency>) -> Self {
        match dependency {
            Some(dependency) => self.bind(name, dependency),
            None => self.slot(name),
        }
    }

    pub fn build(self) -> DependencyRegistry {
        DependencyRegistry {
            slots: self
                .slots
                .into_iter()
                .map(|(name, dep)| (name, RwLock::new(dep.map(Arc::new))))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_bound_and_unset() {
        let registry = DependencyRegistry::builder()
            .bind("llm_model", Dependency::value("gpt-3.5-turbo"))
            .slot("llm_api_key")
            .build();

        assert!(registry.contains("llm_api_key"));
        assert!(registry.resolve("llm_api_key").is_none());
        assert!(registry.resolve("nope").is_none());

        let model = registry.resolve("llm_model").unwrap();
        assert!(matches!(&*model, Dependency::Value(v) if v == &json!("gpt-3.5-turbo")));
    }

    #[test]
    fn test_rotate_swaps_value() {
        let registry = DependencyRegistry::builder()
            .bind("api_key", Dependency::secret("old"))
            .build();

        let before = registry.resolve("api_key").unwrap();
        registry.rotate("api_key", Dependency::secret("new")).unwrap();
        let after = registry.resolve("api_key").unwrap();

        // Holders of the old Arc are unaffected.
        assert!(matches!(&*before, Dependency::Secret(s) if s.expose() == "old"));
        assert!(matches!(&*after, Dependency::Secret(s) if s.expose() == "new"));
    }

    #[test]
    fn test_rotate_unknown_key_fails() {
        let registry = DependencyRegistry::builder().slot("a").build();
        assert_eq!(
            registry.rotate("b", Dependency::value(1)),
            Err(RegistryError::UnknownKey("b".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear_empties_slot() {
        let registry = DependencyRegistry::builder()
            .bind("a", Dependency::value(1))
            .build();
        registry.clear("a").unwrap();
        assert!(registry.resolve("a").is_none());
        assert!(registry.contains("a"));
    }

    #[test]
    fn test_debug_never_shows_secrets() {
        let registry = DependencyRegistry::builder()
            .bind("api_key", Dependency::secret("secret123"))
            .bind("client", Dependency::shared(42u8))
            .build();

        let debug = format!("{:?}", registry);
        assert!(!debug.contains("secret123"));
        assert!(debug.contains("api_key"));

        let dep = Dependency::secret("secret123");
        assert!(!format!("{:?}", dep).contains("secret123"));
    }

    #[test]
    fn test_concurrent_rotation_never_tears() {
        let registry = Arc::new(
            DependencyRegistry::builder()
                .bind("n", Dependency::value(0))
                .build(),
        );

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for i in 1..=200 {
                    registry.rotate("n", Dependency::value(i)).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let dep = registry.resolve("n").unwrap();
            assert!(matches!(&*dep, Dependency::Value(v) if v.is_number()));
        }
        writer.join().unwrap();

        let last = registry.resolve("n").unwrap();
        assert!(matches!(&*last, Dependency::Value(v) if v == &json!(200)));
    }
}
