// packages/executor/src/tools/registry.rs
//! Name → tool lookup

use crate::tools::builtin::EchoTool;
use crate::utils::errors::{ExecutorError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A named capability a task can request
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    async fn execute(&self, input: Value) -> Result<Value>;
}

/// Registry of tools, fixed after startup
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in tools
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // names of built-ins are distinct, registration cannot collide
        let _ = registry.register(Arc::new(EchoTool));
        registry
    }

    /// Add a tool. A second tool under the same name is rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ExecutorError::InvalidConfig(format!(
                "tool '{}' is already registered",
                name
            )));
        }

        debug!("Registered tool {}", name);
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Look up a tool, failing closed on a miss
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .ok_or_else(|| ExecutorError::ToolNotFound(name.to_string()))
    }

    /// Check every requested name, returning the first miss
    pub fn check_all<S: AsRef<str>>(&self, names: &[S]) -> Result<()> {
        for name in names {
            self.resolve(name.as_ref())?;
        }
        Ok(())
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
