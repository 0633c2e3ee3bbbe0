// packages/executor/src/tools/builtin.rs
//! Built-in tools

use crate::tools::registry::Tool;
use crate::utils::errors::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Returns its input unchanged
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        Ok(input)
    }
}
