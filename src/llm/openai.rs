//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 请求携带 tools / tool_choice，回复中的 tool_calls 保留原始参数字符串，交给决策协议解析。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{
    AssistantReply, CompletionRequest, CompletionResponse, LlmClient, LlmError, ToolChoiceMode,
};
use crate::memory::{ContentPart, Message, Role, ToolCall};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        Self::with_timeout(base_url, model, api_key, Duration::from_secs(60))
    }

    pub fn with_timeout(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client: Client::with_config(config).with_http_client(http),
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 获取累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    fn build_request(&self, request: &CompletionRequest) -> Result<CreateChatCompletionRequest, LlmError> {
        let messages = request
            .messages
            .iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>, _>>()?;
        let mut body = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(invalid_request)?;

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body.tools = Some(serde_json::from_value(Value::Array(tools)).map_err(invalid_request)?);
            body.tool_choice =
                Some(serde_json::from_value(tool_choice_value(&request.tool_choice)).map_err(invalid_request)?);
        }
        Ok(body)
    }
}

fn invalid_request(e: impl std::fmt::Display) -> LlmError {
    LlmError::Request(format!("invalid request: {e}"))
}

fn tool_choice_value(mode: &ToolChoiceMode) -> Value {
    match mode {
        ToolChoiceMode::Auto => json!("auto"),
        ToolChoiceMode::Required => json!("required"),
        ToolChoiceMode::Function(name) => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

/// 本地消息 → API 消息；多媒体片段与工具调用按 API 的 JSON 形态填入
fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let msg = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.text())
                .build()
                .map_err(invalid_request)?,
        ),
        Role::User => {
            let mut user = ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid_request)?;
            if !m.parts.is_empty() {
                user.content = serde_json::from_value(content_parts(m)).map_err(invalid_request)?;
            }
            ChatCompletionRequestMessage::User(user)
        }
        Role::Assistant => {
            let mut assistant = ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.text())
                .build()
                .map_err(invalid_request)?;
            if !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments }
                        })
                    })
                    .collect();
                assistant.tool_calls =
                    Some(serde_json::from_value(Value::Array(calls)).map_err(invalid_request)?);
            }
            ChatCompletionRequestMessage::Assistant(assistant)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .content(m.text())
                .build()
                .map_err(invalid_request)?,
        ),
    };
    Ok(msg)
}

fn content_parts(m: &Message) -> Value {
    let mut parts = Vec::new();
    if !m.content.is_empty() {
        parts.push(json!({ "type": "text", "text": m.content }));
    }
    for part in &m.parts {
        parts.push(match part {
            ContentPart::Text { text } => json!({ "type": "text", "text": text }),
            ContentPart::ImageUrl { url } => json!({ "type": "image_url", "image_url": { "url": url } }),
        });
    }
    Value::Array(parts)
}

/// 回复中的 tool_calls（序列化后的 JSON 数组）→ 本地 ToolCall，参数保持原始字符串
fn parse_tool_calls(raw: &Value) -> Vec<ToolCall> {
    raw.as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| {
                    let function = c.get("function")?;
                    Some(ToolCall {
                        id: c.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::ApiError(api) => {
            let text = api.to_string();
            let lower = text.to_lowercase();
            if lower.contains("rate limit") || lower.contains("rate_limit") {
                LlmError::RateLimited { retry_after_ms: 1000 }
            } else if lower.contains("api key") || lower.contains("api_key") || lower.contains("unauthorized") {
                LlmError::Unauthorized
            } else {
                LlmError::Api(text)
            }
        }
        OpenAIError::JSONDeserialize(..) => LlmError::InvalidResponse(e.to_string()),
        other => LlmError::Request(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request)?;
        let response = self.client.chat().create(body).await.map_err(|e| {
            tracing::warn!(error = %e, model = %self.model, "completion request failed");
            map_openai_error(e)
        })?;

        // 提取 token 使用统计
        if let Some(usage) = &response.usage {
            self.usage.add(usage.prompt_tokens as u64, usage.completion_tokens as u64);
        }

        let choices = response
            .choices
            .into_iter()
            .map(|c| {
                let calls = serde_json::to_value(&c.message.tool_calls).unwrap_or(Value::Null);
                AssistantReply {
                    content: c.message.content.unwrap_or_default(),
                    tool_calls: parse_tool_calls(&calls),
                }
            })
            .collect();
        Ok(CompletionResponse { choices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;

    fn echo_def() -> ToolDefinition {
        ToolDefinition {
            name: "echo".into(),
            description: "d".into(),
            parameters: json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        }
    }

    #[test]
    fn test_forced_function_request() {
        let client = OpenAiClient::new(Some("http://localhost:1/v1/"), "m", Some("k"));
        let request = CompletionRequest::text(vec![Message::user("hi")])
            .with_tools(vec![echo_def()], ToolChoiceMode::Function("echo".into()));
        let body = serde_json::to_value(client.build_request(&request).unwrap()).unwrap();
        assert_eq!(body["model"], "m");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "echo");
        assert_eq!(body["tool_choice"]["function"]["name"], "echo");
    }

    #[test]
    fn test_plain_text_request_has_no_tools() {
        let client = OpenAiClient::new(None, "m", Some("k"));
        let body = serde_json::to_value(
            client
                .build_request(&CompletionRequest::text(vec![Message::system("s"), Message::user("u")]))
                .unwrap(),
        )
        .unwrap();
        assert!(body.get("tools").map_or(true, Value::is_null));
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[test]
    fn test_tool_messages_carry_ids() {
        let assistant = Message::assistant_with_calls(
            "",
            vec![ToolCall { id: "c1".into(), name: "echo".into(), arguments: "{\"text\":\"a\"}".into() }],
        );
        let wire = serde_json::to_value(to_openai_message(&assistant).unwrap()).unwrap();
        assert_eq!(wire["tool_calls"][0]["id"], "c1");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"text\":\"a\"}");

        let result = serde_json::to_value(to_openai_message(&Message::tool_result("c1", "echo", "ok")).unwrap()).unwrap();
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "c1");
    }

    #[test]
    fn test_parse_tool_calls_keeps_raw_arguments() {
        let raw = json!([
            {"id": "x", "type": "function", "function": {"name": "echo", "arguments": "{\"text\":\"a\"}"}},
            {"id": "y", "type": "custom", "custom": {"name": "grammar", "input": "..."}}
        ]);
        let calls = parse_tool_calls(&raw);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, "{\"text\":\"a\"}");
        assert!(parse_tool_calls(&Value::Null).is_empty());
    }
}
