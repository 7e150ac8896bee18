//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! - MockLlmClient：离线回显，提供 echo 工具时调用 echo，看到工具结果后直接收尾
//! - ScriptedLlmClient：按脚本应答并记录全部请求，测试中作为确定性的 LLM

use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, ToolChoiceMode};
use crate::memory::Role;

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .unwrap_or_else(|| "(no input)".to_string());
        let saw_result = request.messages.iter().any(|m| m.role == Role::Tool);

        let forced = match &request.tool_choice {
            ToolChoiceMode::Function(name) => Some(name.clone()),
            _ => None,
        };
        if let Some(name) = forced {
            return Ok(CompletionResponse::tool_call(
                name,
                serde_json::json!({ "text": format!("Echo from Mock: {last_user}") }),
            ));
        }
        if !saw_result && request.tools.iter().any(|t| t.name == "echo") {
            return Ok(CompletionResponse::tool_call(
                "echo",
                serde_json::json!({ "text": format!("Echo from Mock: {last_user}") }),
            ));
        }
        Ok(CompletionResponse::text(format!("Echo from Mock: {last_user}")))
    }
}

type Responder =
    dyn Fn(&CompletionRequest, usize) -> Result<CompletionResponse, LlmError> + Send + Sync;

/// 脚本化客户端：responder(request, 调用序号) 决定应答
pub struct ScriptedLlmClient {
    responder: Box<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlmClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> Result<CompletionResponse, LlmError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 依次返回给定应答；用尽后重复最后一条
    pub fn sequence(responses: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        Self::new(move |_, i| match responses.get(i).or_else(|| responses.last()) {
            Some(r) => r.clone(),
            None => Ok(CompletionResponse::text("")),
        })
    }

    /// 迄今收到的全部请求
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let index = {
            let mut log = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            log.push(request.clone());
            log.len() - 1
        };
        (self.responder)(&request, index)
    }
}
