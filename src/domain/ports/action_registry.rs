//! Named side-effect registry for pipeline action nodes.
//!
//! Actions register by name at startup; pipeline validation resolves
//! names statically, so there is no runtime code loading. Unknown names
//! are a validation error at pipeline create time.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One named side effect invocable by an action node.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the side effect. `config` is the node's opaque config,
    /// `context` the run context accumulated so far.
    async fn invoke(
        &self,
        config: &serde_json::Value,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, String>;
}

/// Closure adapter for simple handlers.
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F> ActionHandler for FnAction<F>
where
    F: Fn(
            &serde_json::Value,
            &serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, String>
        + Send
        + Sync,
{
    async fn invoke(
        &self,
        config: &serde_json::Value,
        context: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, String> {
        (self.0)(config, context)
    }
}

/// Static name -> handler registry.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in actions.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "log_message",
            Arc::new(FnAction(|config: &serde_json::Value, _ctx: &serde_json::Map<String, serde_json::Value>| {
                let message = config
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("(no message)");
                tracing::info!(action = "log_message", "{}", message);
                Ok(serde_json::json!({ "logged": message }))
            })),
        );
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
