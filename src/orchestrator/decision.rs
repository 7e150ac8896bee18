//! 决策协议：强制 LLM 给出恰好一个结构化工具调用或纯文本
//!
//! 畸形回复（候选数不为 1、多个工具调用、参数无法解码、未知工具、传输错误）在预算内重试，
//! 重试时把上一轮的缺陷作为纠正提示追加进消息；预算耗尽返回 DecisionMalformed。

use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, ToolChoiceMode};
use crate::memory::{Message, ToolChoice};
use crate::orchestrator::events::{AgentEvent, EventSink};
use crate::orchestrator::prompt;
use crate::tools::{parse_arguments, ToolDefinition};

/// 一次决策的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// 一个或多个（仅并行模式）工具调用，按 LLM 给出的顺序
    Tools(Vec<ToolChoice>),
    /// 没有工具调用，返回文本
    Text(String),
}

impl Decision {
    pub fn into_choices(self) -> Vec<ToolChoice> {
        match self {
            Decision::Tools(c) => c,
            Decision::Text(_) => Vec::new(),
        }
    }
}

pub struct DecisionProtocol<'a> {
    llm: &'a dyn LlmClient,
    max_retries: usize,
    cancel: &'a CancellationToken,
    events: &'a EventSink,
    allow_multiple: bool,
}

impl<'a> DecisionProtocol<'a> {
    pub fn new(
        llm: &'a dyn LlmClient,
        max_retries: usize,
        cancel: &'a CancellationToken,
        events: &'a EventSink,
    ) -> Self {
        Self {
            llm,
            max_retries,
            cancel,
            events,
            allow_multiple: false,
        }
    }

    /// 并行模式下允许一次回复包含多个工具调用
    pub fn allow_multiple(mut self, allow: bool) -> Self {
        self.allow_multiple = allow;
        self
    }

    /// 零个工具调用时返回 Text
    pub async fn decide(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        forced: Option<&str>,
    ) -> Result<Decision, OrchestratorError> {
        self.run(messages, tools, forced, false).await
    }

    /// 必须返回工具调用；零个工具调用视为畸形并重试
    pub async fn decide_forced(
        &self,
        messages: &[Message],
        tool: &ToolDefinition,
    ) -> Result<ToolChoice, OrchestratorError> {
        let decision = self
            .run(messages, std::slice::from_ref(tool), Some(&tool.name), true)
            .await?;
        match decision.into_choices().into_iter().next() {
            Some(choice) => Ok(choice),
            None => Err(OrchestratorError::DecisionMalformed {
                attempts: self.max_retries + 1,
                last_error: format!("no call to `{}` returned", tool.name),
            }),
        }
    }

    /// 不带工具的文本请求（仅传输错误会重试）
    pub async fn ask_text(&self, messages: &[Message]) -> Result<String, OrchestratorError> {
        let mut last_error = String::new();
        for attempt in 1..=self.max_retries + 1 {
            self.check_cancel()?;
            match self.llm.complete(CompletionRequest::text(messages.to_vec())).await {
                Ok(resp) => match resp.choices.first() {
                    Some(c) => return Ok(c.content.clone()),
                    None => last_error = "no choices returned".to_string(),
                },
                Err(e) => last_error = e.to_string(),
            }
            self.note_retry(attempt, &last_error);
        }
        Err(OrchestratorError::DecisionMalformed {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    async fn run(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        forced: Option<&str>,
        require_tool: bool,
    ) -> Result<Decision, OrchestratorError> {
        let mut messages = messages.to_vec();
        let tool_choice = match forced {
            Some(name) => ToolChoiceMode::Function(name.to_string()),
            None if require_tool => ToolChoiceMode::Required,
            None => ToolChoiceMode::Auto,
        };
        let mut last_error = String::new();

        for attempt in 1..=self.max_retries + 1 {
            self.check_cancel()?;
            let request = CompletionRequest::text(messages.clone())
                .with_tools(tools.to_vec(), tool_choice.clone());
            match self.llm.complete(request).await {
                Ok(resp) => match self.interpret(resp, tools, require_tool) {
                    Ok(decision) => return Ok(decision),
                    Err(defect) => {
                        messages.push(Message::system(prompt::correction(&defect)));
                        last_error = defect;
                    }
                },
                Err(e) => last_error = e.to_string(),
            }
            self.note_retry(attempt, &last_error);
        }

        Err(OrchestratorError::DecisionMalformed {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    fn interpret(
        &self,
        resp: CompletionResponse,
        tools: &[ToolDefinition],
        require_tool: bool,
    ) -> Result<Decision, String> {
        if resp.choices.len() != 1 {
            return Err(format!(
                "expected exactly one choice, got {}",
                resp.choices.len()
            ));
        }
        let Some(reply) = resp.choices.into_iter().next() else {
            return Err("no choices returned".to_string());
        };

        if reply.tool_calls.is_empty() {
            return if require_tool {
                Err("a tool call is required but none was returned".to_string())
            } else {
                Ok(Decision::Text(reply.content))
            };
        }
        if reply.tool_calls.len() > 1 && !self.allow_multiple {
            return Err(format!(
                "expected one tool call, got {}",
                reply.tool_calls.len()
            ));
        }

        let mut choices = Vec::with_capacity(reply.tool_calls.len());
        for call in reply.tool_calls {
            if !tools.iter().any(|t| t.name == call.name) {
                return Err(format!("unknown tool `{}`", call.name));
            }
            let arguments = parse_arguments(&call.arguments)
                .map_err(|e| format!("tool `{}`: {}", call.name, e))?;
            choices.push(ToolChoice::new(call.name, arguments).with_reasoning(reply.content.clone()));
        }
        Ok(Decision::Tools(choices))
    }

    fn check_cancel(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn note_retry(&self, attempt: usize, reason: &str) {
        tracing::warn!(attempt, reason = %reason, "malformed decision");
        self.events.send(AgentEvent::DecisionRetry {
            attempt,
            reason: reason.to_string(),
        });
    }
}
