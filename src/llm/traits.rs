//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient::complete：
//! 输入消息、工具 schema 与可选强制工具，返回一条或多条候选回复（文本 + 零到多个工具调用）。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::{Message, ToolCall};
use crate::tools::ToolDefinition;

/// LLM 调用错误（传输层）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 工具选择模式
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    /// 由模型决定是否调用工具
    #[default]
    Auto,
    /// 必须调用某个工具
    Required,
    /// 必须调用指定工具
    Function(String),
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoiceMode,
}

impl CompletionRequest {
    /// 不带工具的纯文本请求
    pub fn text(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, tool_choice: ToolChoiceMode) -> Self {
        self.tools = tools;
        self.tool_choice = tool_choice;
        self
    }

    /// 请求中提供的工具名
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }
}

/// 一条候选回复
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<AssistantReply>,
}

impl CompletionResponse {
    /// 单条纯文本回复
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![AssistantReply {
                content: content.into(),
                tool_calls: Vec::new(),
            }],
        }
    }

    /// 单条回复，含一个工具调用
    pub fn tool_call(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self::tool_calls(vec![(name.into(), arguments)])
    }

    /// 单条回复，含多个工具调用（按给定顺序）
    pub fn tool_calls(calls: Vec<(String, serde_json::Value)>) -> Self {
        let tool_calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, (name, args))| ToolCall {
                id: format!("oracle_call_{i}"),
                name,
                arguments: args.to_string(),
            })
            .collect();
        Self {
            choices: vec![AssistantReply {
                content: String::new(),
                tool_calls,
            }],
        }
    }

    /// 第一条候选的文本
    pub fn first_text(&self) -> Option<&str> {
        self.choices.first().map(|c| c.content.as_str())
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// 纯文本完成：不带工具，取首条回复文本
    async fn complete_text(&self, messages: &[Message]) -> Result<String, LlmError> {
        let response = self.complete(CompletionRequest::text(messages.to_vec())).await?;
        response
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("no choices".to_string()))
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
