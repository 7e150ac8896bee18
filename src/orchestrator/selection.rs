//! 工具选择与重评估
//!
//! 每轮：准则匹配 → 计算可见工具 → 拼装提示 → 直接模式（一次决策）或强制推理模式
//! （自由推理 → select_intention 强制提交 → 逐个工具生成参数）。
//! 结果是一个临时对话（一条 Assistant 消息：推理 + 新调用 ID 的工具调用），不并入调用方的对话。

use futures_util::future::join_all;

use crate::core::OrchestratorError;
use crate::memory::{Conversation, Message, ToolChoice, ToolOutcome};
use crate::observability::ReasoningSink;
use crate::orchestrator::decision::{Decision, DecisionProtocol};
use crate::orchestrator::events::{AgentEvent, EventSink};
use crate::orchestrator::guideline::{match_guidelines, visible_tools, Guideline};
use crate::orchestrator::intention::{
    intention_definition, parse_intention, Intention, IntentionFallback,
};
use crate::orchestrator::prompt::{self, PromptContext};
use crate::tools::{ToolDefinition, ToolRegistry};

/// 一次选择的结果
#[derive(Clone, Debug, Default)]
pub struct SelectionOutcome {
    /// 选中的调用（按选择顺序）；为空表示不需要工具
    pub choices: Vec<ToolChoice>,
    pub reasoning: String,
    /// 临时对话：一条 Assistant 消息
    pub result: Conversation,
    /// 本轮匹配到的准则
    pub matched: Vec<Guideline>,
}

impl SelectionOutcome {
    fn new(
        choices: Vec<ToolChoice>,
        reasoning: String,
        matched: Vec<Guideline>,
    ) -> Result<Self, OrchestratorError> {
        let calls = choices.iter().map(ToolChoice::to_tool_call).collect();
        let result = Conversation::from_messages(vec![Message::assistant_with_calls(
            reasoning.clone(),
            calls,
        )])?;
        Ok(Self {
            choices,
            reasoning,
            result,
            matched,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

/// 选择阶段的模式开关
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionMode {
    pub strict_guidelines: bool,
    pub forced_reasoning: bool,
    pub parallel: bool,
}

pub struct ToolSelector<'a> {
    protocol: &'a DecisionProtocol<'a>,
    registry: &'a ToolRegistry,
    guidelines: &'a [Guideline],
    prompt: &'a PromptContext,
    mode: SelectionMode,
    fallback: &'a dyn IntentionFallback,
    events: &'a EventSink,
    reasoning: Option<&'a dyn ReasoningSink>,
}

impl<'a> ToolSelector<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        protocol: &'a DecisionProtocol<'a>,
        registry: &'a ToolRegistry,
        guidelines: &'a [Guideline],
        prompt: &'a PromptContext,
        mode: SelectionMode,
        fallback: &'a dyn IntentionFallback,
        events: &'a EventSink,
        reasoning: Option<&'a dyn ReasoningSink>,
    ) -> Self {
        Self {
            protocol,
            registry,
            guidelines,
            prompt,
            mode,
            fallback,
            events,
            reasoning,
        }
    }

    pub async fn select(&self, conversation: &Conversation) -> Result<SelectionOutcome, OrchestratorError> {
        self.select_with(conversation, None, "selection").await
    }

    /// 执行后的重评估：附上本次运行已执行的调用与结果
    pub async fn reevaluate(
        &self,
        conversation: &Conversation,
        outcomes: &[ToolOutcome],
    ) -> Result<SelectionOutcome, OrchestratorError> {
        let note = prompt::continuation(outcomes);
        self.select_with(conversation, Some(note), "reevaluation").await
    }

    /// 按人工反馈重新提出调用
    pub async fn adjust(
        &self,
        conversation: &Conversation,
        choice: &ToolChoice,
        feedback: &str,
    ) -> Result<SelectionOutcome, OrchestratorError> {
        let note = prompt::adjustment(choice, feedback);
        self.select_with(conversation, Some(note), "adjustment").await
    }

    async fn select_with(
        &self,
        conversation: &Conversation,
        note: Option<String>,
        stage: &str,
    ) -> Result<SelectionOutcome, OrchestratorError> {
        self.events.send(AgentEvent::Thinking {
            stage: "guidelines".to_string(),
        });
        let matched = match_guidelines(self.protocol, conversation.messages(), self.guidelines).await?;
        let visible = visible_tools(
            self.registry,
            self.guidelines,
            &matched,
            self.mode.strict_guidelines,
        );
        let defs = visible.definitions();
        if defs.is_empty() {
            tracing::debug!(stage, "no visible tools");
            return SelectionOutcome::new(Vec::new(), String::new(), matched);
        }

        let mut messages = vec![Message::system(prompt::selection_system(
            self.prompt,
            &defs,
            &matched,
        ))];
        messages.extend(conversation.messages().iter().cloned());
        if let Some(note) = note {
            messages.push(Message::system(note));
        }

        self.events.send(AgentEvent::Thinking {
            stage: stage.to_string(),
        });
        let (choices, reasoning) = if self.mode.forced_reasoning {
            self.forced(&messages, &visible, &defs).await?
        } else {
            self.direct(&messages, &defs).await?
        };

        if !reasoning.trim().is_empty() {
            tracing::debug!(stage, reasoning = %reasoning, "selection reasoning");
            self.events.send(AgentEvent::Reasoning {
                stage: stage.to_string(),
                text: reasoning.clone(),
            });
            if let Some(sink) = self.reasoning {
                sink.record(stage, &reasoning);
            }
        }
        for c in &choices {
            self.events.send(AgentEvent::ToolSelected {
                tool: c.name.clone(),
                args: c.arguments_value(),
                call_id: c.call_id.clone(),
            });
        }
        tracing::info!(
            stage,
            selected = ?choices.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "tool selection"
        );
        SelectionOutcome::new(choices, reasoning, matched)
    }

    async fn direct(
        &self,
        messages: &[Message],
        defs: &[ToolDefinition],
    ) -> Result<(Vec<ToolChoice>, String), OrchestratorError> {
        match self.protocol.decide(messages, defs, None).await? {
            Decision::Text(text) => Ok((Vec::new(), text)),
            Decision::Tools(choices) => {
                let reasoning = choices
                    .first()
                    .map(|c| c.reasoning.clone())
                    .unwrap_or_default();
                Ok((choices, reasoning))
            }
        }
    }

    async fn forced(
        &self,
        messages: &[Message],
        visible: &ToolRegistry,
        defs: &[ToolDefinition],
    ) -> Result<(Vec<ToolChoice>, String), OrchestratorError> {
        let candidates: Vec<String> = defs.iter().map(|d| d.name.clone()).collect();

        let mut ask = messages.to_vec();
        ask.push(Message::user(prompt::reasoning_request(&candidates)));
        let reasoning = self.protocol.ask_text(&ask).await?;

        let mut commit = messages.to_vec();
        commit.push(Message::assistant(reasoning.clone()));
        commit.push(Message::user(prompt::intention_request(
            &reasoning,
            self.mode.parallel,
        )));
        let intention_tool = intention_definition(&candidates, self.mode.parallel);
        self.events.send(AgentEvent::Thinking {
            stage: "intention".to_string(),
        });
        let intention = match self.protocol.decide_forced(&commit, &intention_tool).await {
            Ok(choice) => parse_intention(&choice, &candidates),
            Err(OrchestratorError::DecisionMalformed { last_error, .. }) => {
                tracing::warn!(error = %last_error, "intention step failed, using fallback");
                Intention::Empty
            }
            Err(e) => return Err(e),
        };
        let mut names = match intention {
            Intention::Sink => {
                tracing::debug!("intention committed to no tool");
                return Ok((Vec::new(), reasoning));
            }
            Intention::Tools(names) => names,
            Intention::Empty => match self.fallback.extract(&reasoning, &candidates) {
                Some(name) => {
                    tracing::warn!(tool = %name, "intention recovered from reasoning text");
                    vec![name]
                }
                None => Vec::new(),
            },
        };
        if !self.mode.parallel {
            names.truncate(1);
        }

        let targets: Vec<ToolDefinition> = names
            .iter()
            .filter_map(|n| visible.definition(n))
            .collect();
        self.events.send(AgentEvent::Thinking {
            stage: "arguments".to_string(),
        });
        let passes = targets.iter().map(|def| {
            let mut req = messages.to_vec();
            req.push(Message::assistant(reasoning.clone()));
            req.push(Message::user(prompt::arguments_request(def, &reasoning)));
            async move { self.protocol.decide_forced(&req, def).await }
        });
        let mut choices = Vec::with_capacity(targets.len());
        for result in join_all(passes).await {
            choices.push(result?.with_reasoning(reasoning.clone()));
        }
        Ok((choices, reasoning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    use crate::llm::{CompletionResponse, ScriptedLlmClient, ToolChoiceMode};
    use crate::orchestrator::intention::{intention_arguments, MarkerFallback, INTENTION_TOOL};
    use crate::tools::EchoTool;

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg
    }

    #[tokio::test]
    async fn test_direct_mode_result_is_transient() {
        let llm = ScriptedLlmClient::sequence(vec![Ok(CompletionResponse::tool_call(
            "echo",
            serde_json::json!({"text": "hi"}),
        ))]);
        let (cancel, events) = (CancellationToken::new(), EventSink::default());
        let protocol = DecisionProtocol::new(&llm, 0, &cancel, &events);
        let (reg, ctx, fallback) = (registry(), PromptContext::default(), MarkerFallback::new());
        let selector = ToolSelector::new(
            &protocol, &reg, &[], &ctx, SelectionMode::default(), &fallback, &events, None,
        );
        let mut conv = Conversation::new();
        conv.push(Message::user("say hi")).unwrap();

        let out = selector.select(&conv).await.unwrap();
        assert_eq!(out.choices.len(), 1);
        assert_eq!(out.result.len(), 1);
        let call = &out.result.messages()[0].tool_calls[0];
        assert_eq!(call.id, out.choices[0].call_id);
        assert_ne!(call.id, "oracle_call_0");
        assert_eq!(conv.len(), 1);
    }

    #[tokio::test]
    async fn test_forced_reasoning_flow() {
        let llm = ScriptedLlmClient::new(|req, _| {
            Ok(match &req.tool_choice {
                ToolChoiceMode::Function(name) if name == INTENTION_TOOL => CompletionResponse::tool_call(
                    INTENTION_TOOL,
                    serde_json::Value::Object(intention_arguments(&["echo"], false)),
                ),
                ToolChoiceMode::Function(name) => {
                    CompletionResponse::tool_call(name.clone(), serde_json::json!({"text": "x"}))
                }
                _ => CompletionResponse::text("echo is the right tool"),
            })
        });
        let (cancel, events) = (CancellationToken::new(), EventSink::default());
        let protocol = DecisionProtocol::new(&llm, 0, &cancel, &events);
        let (reg, ctx, fallback) = (registry(), PromptContext::default(), MarkerFallback::new());
        let mode = SelectionMode {
            forced_reasoning: true,
            ..SelectionMode::default()
        };
        let selector = ToolSelector::new(&protocol, &reg, &[], &ctx, mode, &fallback, &events, None);

        let out = selector.select(&Conversation::new()).await.unwrap();
        assert_eq!(out.choices[0].name, "echo");
        assert_eq!(out.reasoning, "echo is the right tool");
        let requests = llm.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[0].tools.is_empty());
        let enum_values = &requests[1].tools[0].parameters["properties"]["tool"]["enum"];
        assert_eq!(enum_values, &serde_json::json!(["echo", "no_tool"]));
        assert_eq!(requests[2].tool_choice, ToolChoiceMode::Function("echo".into()));
    }

    #[tokio::test]
    async fn test_sink_choice_selects_nothing() {
        let llm = ScriptedLlmClient::new(|req, _| {
            Ok(match &req.tool_choice {
                ToolChoiceMode::Function(_) => CompletionResponse::tool_call(
                    INTENTION_TOOL,
                    serde_json::json!({"tool": "no_tool"}),
                ),
                _ => CompletionResponse::text("no_tool, just answer"),
            })
        });
        let (cancel, events) = (CancellationToken::new(), EventSink::default());
        let protocol = DecisionProtocol::new(&llm, 0, &cancel, &events);
        let (reg, ctx, fallback) = (registry(), PromptContext::default(), MarkerFallback::new());
        let mode = SelectionMode {
            forced_reasoning: true,
            ..SelectionMode::default()
        };
        let selector = ToolSelector::new(&protocol, &reg, &[], &ctx, mode, &fallback, &events, None);
        let out = selector.select(&Conversation::new()).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_sink_choice_is_not_overridden_by_reasoning_text() {
        let llm = ScriptedLlmClient::new(|req, _| {
            Ok(match &req.tool_choice {
                ToolChoiceMode::Function(_) => CompletionResponse::tool_call(
                    INTENTION_TOOL,
                    serde_json::json!({"tool": "no_tool"}),
                ),
                _ => CompletionResponse::text("Echo is not needed here; I will answer directly."),
            })
        });
        let (cancel, events) = (CancellationToken::new(), EventSink::default());
        let protocol = DecisionProtocol::new(&llm, 0, &cancel, &events);
        let (reg, ctx, fallback) = (registry(), PromptContext::default(), MarkerFallback::new());
        assert_eq!(
            fallback.extract("Echo is not needed here; I will answer directly.", &["echo".to_string()]),
            Some("echo".to_string())
        );
        let mode = SelectionMode {
            forced_reasoning: true,
            ..SelectionMode::default()
        };
        let selector = ToolSelector::new(&protocol, &reg, &[], &ctx, mode, &fallback, &events, None);
        let out = selector.select(&Conversation::new()).await.unwrap();
        assert!(out.is_empty());
        assert!(out.reasoning.starts_with("Echo is not needed"));
        assert_eq!(llm.call_count(), 2);
    }
}
