//! 远程工具：外部托管的工具列表 / 调用协议适配
//!
//! 协议本身（MCP 等）由实现 RemoteToolProvider 的适配器负责；这里把列出的每个工具包装成本地 Tool。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::schema::normalize_args;
use crate::tools::{Tool, ToolDefinition, ToolRegistry};

/// 远程调用结果：文本 + 显式失败标记
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteToolResult {
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

#[async_trait]
pub trait RemoteToolProvider: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, String>;

    async fn call_tool(&self, name: &str, args: Value) -> Result<RemoteToolResult, String>;
}

/// 单个远程工具
pub struct RemoteTool {
    definition: ToolDefinition,
    provider: Arc<dyn RemoteToolProvider>,
}

impl RemoteTool {
    pub fn new(definition: ToolDefinition, provider: Arc<dyn RemoteToolProvider>) -> Self {
        Self {
            definition,
            provider,
        }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn parameters_schema(&self) -> Value {
        self.definition.parameters.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        tracing::debug!(tool = %self.definition.name, "remote tool invoke");
        let result = self
            .provider
            .call_tool(&self.definition.name, normalize_args(args))
            .await?;
        if result.is_error {
            Err(result.text)
        } else {
            Ok(result.text)
        }
    }
}

/// 列出远程工具并全部注册，返回注册数量
pub async fn register_remote_tools(
    registry: &mut ToolRegistry,
    provider: Arc<dyn RemoteToolProvider>,
) -> Result<usize, String> {
    let defs = provider.list_tools().await?;
    let count = defs.len();
    for def in defs {
        registry.register(RemoteTool::new(def, provider.clone()));
    }
    tracing::info!(count, "remote tools registered");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeServer;

    #[async_trait]
    impl RemoteToolProvider for FakeServer {
        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, String> {
            Ok(vec![ToolDefinition {
                name: "lookup".into(),
                description: "Look up a key".into(),
                parameters: serde_json::json!({"type": "object", "properties": {"key": {"type": "string"}}}),
            }])
        }

        async fn call_tool(&self, _name: &str, args: Value) -> Result<RemoteToolResult, String> {
            match args.get("key").and_then(Value::as_str) {
                Some(k) => Ok(RemoteToolResult { text: format!("value of {k}"), is_error: false }),
                None => Ok(RemoteToolResult { text: "missing key".into(), is_error: true }),
            }
        }
    }

    #[tokio::test]
    async fn test_remote_tools_registered_and_flag_respected() {
        let mut reg = ToolRegistry::new();
        let n = register_remote_tools(&mut reg, Arc::new(FakeServer)).await.unwrap();
        assert_eq!(n, 1);
        let tool = reg.get("lookup").unwrap();
        assert_eq!(tool.execute(serde_json::json!({"key": "a"})).await.unwrap(), "value of a");
        assert_eq!(tool.execute(Value::Null).await.unwrap_err(), "missing key");
    }
}
