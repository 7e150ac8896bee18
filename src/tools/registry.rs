//! 工具注册表
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / execute），由 ToolRegistry 按名注册与查找。
//! 注册表保持注册顺序，导出给 LLM 的 schema 列表顺序稳定。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 工具 trait：名称、描述（供 LLM 理解）、参数 schema、异步执行（args 为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（tool call 中的 name 字段）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认空对象，表示无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 执行工具
    async fn execute(&self, args: Value) -> Result<String, String>;
}

/// 提供给 LLM 的工具定义
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

/// 工具注册表：按注册顺序保存 Arc<dyn Tool>，名称索引用于查找
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    /// 同名工具原位替换
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&i| self.tools[i].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 全部工具的 LLM 侧定义
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| ToolDefinition::of(t.as_ref())).collect()
    }

    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.get(name).map(|t| ToolDefinition::of(t.as_ref()))
    }

    /// 只保留给定名称的子集，顺序与原注册表一致
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> ToolRegistry {
        let mut out = ToolRegistry::new();
        for tool in &self.tools {
            if names.iter().any(|n| n.as_ref() == tool.name()) {
                out.register_arc(tool.clone());
            }
        }
        out
    }

    /// 返回 (name, description) 列表，用于生成 prompt 中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }
}
