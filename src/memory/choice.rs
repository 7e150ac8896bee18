//! ToolChoice：一次被提出的工具调用（名称、参数、推理、调用 ID）

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::{canonical_arguments, ToolCall};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolChoice {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub reasoning: String,
    pub call_id: String,
}

impl ToolChoice {
    /// 新建并分配新的调用 ID
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
            reasoning: String::new(),
            call_id: new_call_id(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// 换一个新的调用 ID（审批人给出的替换调用不复用其自带 ID）
    pub fn refresh_call_id(mut self) -> Self {
        self.call_id = new_call_id();
        self
    }

    /// 写入 Assistant 消息的工具调用
    pub fn to_tool_call(&self) -> ToolCall {
        ToolCall {
            id: self.call_id.clone(),
            name: self.name.clone(),
            arguments: canonical_arguments(&self.arguments),
        }
    }

    pub fn arguments_value(&self) -> Value {
        Value::Object(self.arguments.clone())
    }
}

pub fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_ids_are_unique() {
        let a = ToolChoice::new("echo", Map::new());
        let b = ToolChoice::new("echo", Map::new());
        assert_ne!(a.call_id, b.call_id);
        assert!(a.call_id.starts_with("call_"));
        assert_eq!(a.to_tool_call().arguments, "{}");
        let refreshed = a.clone().refresh_call_id();
        assert_ne!(refreshed.call_id, a.call_id);
        assert_eq!(refreshed.name, a.name);
    }
}
