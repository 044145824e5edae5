//! Discovery over link-time registered fixtures.

use serde_json::json;
use std::sync::Arc;
use toolbox::{discover, CallScope, Dependency, DependencyRegistry, SurfaceBuilder};

mod fixtures {
    pub mod alpha {
        /// Look up a query.
        #[toolbox::procedure]
        pub async fn lookup_action(query: String, api_key: String) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "query": query, "api_key": api_key }))
        }

        /// Not an action, so never published.
        #[toolbox::procedure]
        pub async fn helper(query: String) -> anyhow::Result<String> {
            Ok(query)
        }
    }

    pub mod beta {
        #[toolbox::procedure]
        pub async fn good_action(word: String) -> anyhow::Result<String> {
            Ok(word)
        }

        /// `progress` is not a registry key here, and callers cannot supply it.
        #[toolbox::procedure]
        pub async fn handle_action(progress: toolbox::Progress) -> anyhow::Result<bool> {
            Ok(progress.is_enabled())
        }
    }

    pub mod gamma {
        #[toolbox::procedure(defaults(count = "many"))]
        pub async fn count_action(count: u32) -> anyhow::Result<u32> {
            Ok(count)
        }
    }

    pub mod delta {
        use toolbox::{
            BindError, BoundArguments, ProcedureEntry, ProcedureFuture, ProcedureSignature,
            ProcedureUnit,
        };

        struct Panicky;

        impl ProcedureUnit for Panicky {
            fn identity(&self) -> &'static str {
                "panicky_action"
            }

            fn description(&self) -> &'static str {
                "Fails while describing itself"
            }

            fn signature(&self) -> ProcedureSignature {
                panic!("signature unavailable")
            }

            fn invoke(&self, _arguments: BoundArguments) -> Result<ProcedureFuture, BindError> {
                Ok(Box::pin(async { Ok(serde_json::Value::Null) }))
            }
        }

        fn load() -> Box<dyn ProcedureUnit> {
            Box::new(Panicky)
        }

        inventory::submit! {
            ProcedureEntry::new(module_path!(), "panicky_action", load)
        }
    }
}

mod clash {
    pub mod one {
        #[toolbox::procedure]
        pub async fn ping_action() -> anyhow::Result<String> {
            Ok("one".into())
        }
    }

    pub mod two {
        #[toolbox::procedure]
        pub async fn ping_action() -> anyhow::Result<String> {
            Ok("two".into())
        }
    }
}

fn registry() -> Arc<DependencyRegistry> {
    Arc::new(
        DependencyRegistry::builder()
            .bind("api_key", Dependency::secret("secret123"))
            .build(),
    )
}

#[test]
fn test_broken_modules_skipped_others_load() {
    let discovery = discover("discovery::fixtures", &registry());

    let names: Vec<_> = discovery.wrappers.iter().map(|w| w.name()).collect();
    assert_eq!(names, vec!["lookup"]);

    let skipped: Vec<_> = discovery.failures.iter().map(|f| f.module.as_str()).collect();
    assert_eq!(
        skipped,
        vec![
            "discovery::fixtures::beta",
            "discovery::fixtures::delta",
            "discovery::fixtures::gamma",
        ]
    );

    let beta = &discovery.failures[0];
    assert_eq!(beta.identity, "handle_action");
    assert!(beta.reason.contains("progress"));
    assert!(beta
        .to_string()
        .starts_with("module discovery::fixtures::beta skipped: handle_action failed to load: "));
}

#[test]
fn test_discovery_is_idempotent() {
    let registry = registry();
    let first = discover("discovery::fixtures", &registry);
    let second = discover("discovery::fixtures", &registry);

    let tools = |d: &toolbox::Discovery| d.wrappers.iter().map(|w| w.tool().clone()).collect::<Vec<_>>();
    assert_eq!(tools(&first), tools(&second));
    assert_eq!(first.failures, second.failures);
}

#[tokio::test]
async fn test_lookup_scenario() -> anyhow::Result<()> {
    let discovery = discover("discovery::fixtures::alpha", &registry());
    let lookup = &discovery.wrappers[0];

    assert_eq!(lookup.origin(), "discovery::fixtures::alpha::lookup_action");
    assert_eq!(
        serde_json::to_value(lookup.input_schema())?,
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    );

    let out = lookup
        .invoke(json!({ "query": "weather" }), CallScope::detached())
        .await?;
    assert_eq!(out, json!({ "query": "weather", "api_key": "secret123" }));
    Ok(())
}

#[test]
fn test_duplicate_public_name_fails_build() {
    let discovery = discover("discovery::clash", &registry());
    assert_eq!(discovery.wrappers.len(), 2);

    let mut builder = SurfaceBuilder::new();
    let err = builder.publish_all(discovery.wrappers).unwrap_err();
    assert_eq!(err.name, "ping");
    assert_eq!(err.first, "discovery::clash::one::ping_action");
    assert_eq!(err.second, "discovery::clash::two::ping_action");
}
