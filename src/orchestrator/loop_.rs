//! 编排主循环
//!
//! SELECT → (人工审批) → EXECUTE → RE-EVALUATE → {SELECT | DONE}，受 max_rounds 约束。
//! 可选预检（是否需要工具）与规划钩子在第一轮之前运行；重评估选出的调用作为下一轮的预选动作，跳过选择。
//! 循环本身严格串行，唯一的并发是 parallel_tools 下同一轮内的批量执行。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;
use crate::llm::LlmClient;
use crate::memory::{Conversation, Message, Status, ToolChoice, ToolOutcome};
use crate::observability::ReasoningSink;
use crate::orchestrator::decision::DecisionProtocol;
use crate::orchestrator::events::{preview, AgentEvent, EventSink};
use crate::orchestrator::gate::{AutoApprove, GateDecision, HumanGate, SessionState};
use crate::orchestrator::guideline::Guideline;
use crate::orchestrator::intention::{IntentionFallback, MarkerFallback};
use crate::orchestrator::loop_detect::LoopDetector;
use crate::orchestrator::parallel::execute_batch;
use crate::orchestrator::planning::PlanningHook;
use crate::orchestrator::prompt::{self, PromptContext};
use crate::orchestrator::selection::{SelectionMode, ToolSelector};
use crate::tools::{ToolExecutor, ToolRegistry};

/// 结果回调：可在追加进对话前改写工具结果
pub type ResultCallback = Arc<dyn Fn(&ToolChoice, String) -> String + Send + Sync>;
/// 每轮结束后的状态观察者
pub type StatusObserver = Arc<dyn Fn(&Status) + Send + Sync>;

/// 编排参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorOptions {
    pub max_rounds: usize,
    /// 决策协议的重试次数（不含首次）
    pub decision_retries: usize,
    /// 工具执行的重试次数（不含首次）
    pub execution_retries: usize,
    pub max_adjustment_attempts: usize,
    /// 0 表示关闭循环检测
    pub loop_threshold: usize,
    pub strict_guidelines: bool,
    pub forced_reasoning: bool,
    pub parallel_tools: bool,
    pub prepass: bool,
    pub prompt: PromptContext,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_rounds: 1,
            decision_retries: 2,
            execution_retries: 1,
            max_adjustment_attempts: 3,
            loop_threshold: 3,
            strict_guidelines: false,
            forced_reasoning: false,
            parallel_tools: false,
            prepass: false,
            prompt: PromptContext::default(),
        }
    }
}

/// 运行起点
enum Seed {
    /// 从选择开始（含预检与规划）
    Fresh,
    /// 调用方预选的动作，仍需审批
    Preselected(Vec<ToolChoice>),
    /// resume：待审调用视为已批准
    Approved(ToolChoice),
}

/// 审批后的调用
enum Reviewed {
    Run(ToolChoice),
    Skip(ToolChoice, Option<String>),
}

impl Reviewed {
    fn choice(&self) -> &ToolChoice {
        match self {
            Reviewed::Run(c) | Reviewed::Skip(c, _) => c,
        }
    }
}

/// 编排器：不可变，成员均为 Arc，可廉价克隆；每次运行拥有自己的对话与状态
#[derive(Clone)]
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    guidelines: Arc<Vec<Guideline>>,
    options: OrchestratorOptions,
    gate: Arc<dyn HumanGate>,
    result_callback: Option<ResultCallback>,
    status_observer: Option<StatusObserver>,
    events: EventSink,
    reasoning: Option<Arc<dyn ReasoningSink>>,
    planning: Option<Arc<dyn PlanningHook>>,
    fallback: Arc<dyn IntentionFallback>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>, options: OrchestratorOptions) -> Self {
        Self {
            llm,
            registry,
            guidelines: Arc::new(Vec::new()),
            options,
            gate: Arc::new(AutoApprove),
            result_callback: None,
            status_observer: None,
            events: EventSink::default(),
            reasoning: None,
            planning: None,
            fallback: Arc::new(MarkerFallback::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_guidelines(mut self, guidelines: Vec<Guideline>) -> Self {
        self.guidelines = Arc::new(guidelines);
        self
    }

    pub fn with_gate(mut self, gate: Arc<dyn HumanGate>) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_result_callback(mut self, callback: ResultCallback) -> Self {
        self.result_callback = Some(callback);
        self
    }

    pub fn with_status_observer(mut self, observer: StatusObserver) -> Self {
        self.status_observer = Some(observer);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_reasoning_sink(mut self, sink: Arc<dyn ReasoningSink>) -> Self {
        self.reasoning = Some(sink);
        self
    }

    pub fn with_planning(mut self, hook: Arc<dyn PlanningHook>) -> Self {
        self.planning = Some(hook);
        self
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn IntentionFallback>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn guidelines(&self) -> &[Guideline] {
        &self.guidelines
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// 供规划钩子使用的嵌套编排器：共享全部组件，但关闭规划
    pub fn nested(&self) -> Orchestrator {
        let mut nested = self.clone();
        nested.planning = None;
        nested
    }

    /// 运行一次编排，返回更新后的新对话；输入对话不被修改
    pub async fn run(&self, conversation: &Conversation) -> Result<Conversation, OrchestratorError> {
        self.run_seeded(conversation.clone(), Seed::Fresh).await
    }

    /// 以预选动作开始（跳过预检、规划与第一次选择）
    pub async fn run_with(
        &self,
        conversation: &Conversation,
        preselected: Vec<ToolChoice>,
    ) -> Result<Conversation, OrchestratorError> {
        if preselected.is_empty() {
            return self.run(conversation).await;
        }
        self.run_seeded(conversation.clone(), Seed::Preselected(preselected))
            .await
    }

    /// 从拦截快照继续；待审调用视为已获批准
    pub async fn resume(&self, session: SessionState) -> Result<Conversation, OrchestratorError> {
        session.conversation.validate()?;
        tracing::info!(tool = %session.pending.name, "resuming session");
        self.run_seeded(session.conversation, Seed::Approved(session.pending))
            .await
    }

    async fn run_seeded(&self, mut conv: Conversation, seed: Seed) -> Result<Conversation, OrchestratorError> {
        let opts = &self.options;
        let protocol = DecisionProtocol::new(
            self.llm.as_ref(),
            opts.decision_retries,
            &self.cancel,
            &self.events,
        )
        .allow_multiple(opts.parallel_tools);
        let mode = SelectionMode {
            strict_guidelines: opts.strict_guidelines,
            forced_reasoning: opts.forced_reasoning,
            parallel: opts.parallel_tools,
        };
        let selector = ToolSelector::new(
            &protocol,
            &self.registry,
            &self.guidelines,
            &opts.prompt,
            mode,
            self.fallback.as_ref(),
            &self.events,
            self.reasoning.as_deref(),
        );
        let executor = ToolExecutor::new(self.registry.clone(), opts.execution_retries);
        let detector = LoopDetector::new(opts.loop_threshold);

        let (mut pending, mut approved, mut batch_reasoning) = match seed {
            Seed::Fresh => {
                self.check_cancel()?;
                if opts.prepass && !self.prepass(&protocol, &conv).await? {
                    let reasoning = "pre-pass: no tool is warranted".to_string();
                    self.finish(&reasoning);
                    return Err(OrchestratorError::NoSelection { reasoning });
                }
                if let Some(hook) = &self.planning {
                    if self.wants_plan(&protocol, &conv).await? {
                        let report = hook.execute_plan(&conv, &self.nested()).await?;
                        if report.invoked {
                            self.finish("planned");
                            return Ok(report.conversation);
                        }
                    }
                }
                (Vec::new(), false, String::new())
            }
            Seed::Preselected(choices) => {
                let reasoning = first_reasoning(&choices);
                (choices, false, reasoning)
            }
            Seed::Approved(choice) => {
                let reasoning = choice.reasoning.clone();
                (vec![choice], true, reasoning)
            }
        };

        let run_start = conv.status.outcomes.len();
        let mut selected_any = !pending.is_empty();
        let mut extra_round_used = false;
        let mut last_reasoning = String::new();
        let mut round = 0;

        while round < opts.max_rounds {
            self.check_cancel()?;
            round += 1;
            tracing::info!(round, max_rounds = opts.max_rounds, "round started");
            self.events.send(AgentEvent::RoundStarted {
                round,
                max_rounds: opts.max_rounds,
            });

            if pending.is_empty() {
                let selection = selector.select(&conv).await?;
                last_reasoning = selection.reasoning.clone();
                if selection.is_empty() {
                    break;
                }
                batch_reasoning = selection.reasoning;
                pending = selection.choices;
                selected_any = true;
            }

            let mut reviewed = Vec::with_capacity(pending.len());
            for choice in std::mem::take(&mut pending) {
                if approved {
                    reviewed.push(Reviewed::Run(choice));
                } else {
                    reviewed.push(self.review(choice, &conv, &selector).await?);
                }
            }
            approved = false;

            for r in &reviewed {
                if let Reviewed::Run(choice) = r {
                    if let Err(e) = detector.check(&conv.status, choice) {
                        if let OrchestratorError::LoopDetected { tool, count, .. } = &e {
                            tracing::warn!(tool = %tool, count, "loop detected");
                            self.events.send(AgentEvent::LoopDetected {
                                tool: tool.clone(),
                                count: *count,
                            });
                        }
                        return Err(e);
                    }
                    detector.record(&mut conv.status, choice);
                }
            }

            let calls = reviewed.iter().map(|r| r.choice().to_tool_call()).collect();
            conv.push(Message::assistant_with_calls(batch_reasoning.clone(), calls))?;

            let runnable: Vec<ToolChoice> = reviewed
                .iter()
                .filter_map(|r| match r {
                    Reviewed::Run(c) => Some(c.clone()),
                    Reviewed::Skip(..) => None,
                })
                .collect();
            let mut outcomes = self.execute(&executor, &runnable).await.into_iter();

            for r in reviewed {
                match r {
                    Reviewed::Run(choice) => {
                        let Some(mut outcome) = outcomes.next() else {
                            break;
                        };
                        if let Some(cb) = &self.result_callback {
                            outcome.result = cb(&choice, outcome.result);
                        }
                        self.events.send(AgentEvent::ToolResult {
                            tool: outcome.name.clone(),
                            call_id: outcome.call_id.clone(),
                            success: outcome.success,
                            preview: preview(&outcome.result),
                        });
                        conv.push(Message::tool_result(
                            outcome.call_id.clone(),
                            outcome.name.clone(),
                            outcome.result.clone(),
                        ))?;
                        if let Some(def) = self.registry.definition(&outcome.name) {
                            conv.status.record_invoked(&def);
                        }
                        conv.status.outcomes.push(outcome);
                    }
                    Reviewed::Skip(choice, reason) => {
                        tracing::info!(tool = %choice.name, "tool call skipped");
                        self.events.send(AgentEvent::ToolSkipped {
                            tool: choice.name.clone(),
                            call_id: choice.call_id.clone(),
                        });
                        conv.push(Message::tool_result(
                            choice.call_id.clone(),
                            choice.name.clone(),
                            skipped_result(reason.as_deref()),
                        ))?;
                    }
                }
            }

            conv.status.iteration += 1;
            if !batch_reasoning.trim().is_empty() {
                conv.status.reasoning_log.push(batch_reasoning.clone());
            }
            if let Some(observer) = &self.status_observer {
                observer(&conv.status);
            }

            if round >= opts.max_rounds {
                tracing::info!(rounds = round, "round budget exhausted");
                break;
            }

            self.check_cancel()?;
            let run_outcomes: Vec<ToolOutcome> = conv.status.outcomes[run_start..].to_vec();
            let next = selector.reevaluate(&conv, &run_outcomes).await?;
            last_reasoning = next.reasoning.clone();
            if next.is_empty() {
                let unconsumed = next.matched.iter().any(|g| g.is_unconsumed(&conv.status));
                if unconsumed && !extra_round_used {
                    tracing::info!("matched guidelines unconsumed, trying one more selection");
                    extra_round_used = true;
                    continue;
                }
                break;
            }
            batch_reasoning = next.reasoning;
            pending = next.choices;
        }

        if !selected_any {
            self.finish("no_selection");
            return Err(OrchestratorError::NoSelection {
                reasoning: last_reasoning,
            });
        }
        self.finish("done");
        Ok(conv)
    }

    /// 人工审批；Adjust 在 max_adjustment_attempts 内重新选择，超出后接受最后一次提议
    async fn review(
        &self,
        choice: ToolChoice,
        conv: &Conversation,
        selector: &ToolSelector<'_>,
    ) -> Result<Reviewed, OrchestratorError> {
        let max = self.options.max_adjustment_attempts;
        let mut current = choice;
        let mut adjustments = 0;
        loop {
            let session = SessionState::new(current.clone(), conv.clone());
            let decision = self.gate.review(&current, &session).await;
            self.events.send(AgentEvent::GateDecision {
                tool: current.name.clone(),
                decision: decision.label().to_string(),
            });
            match decision {
                GateDecision::Approve => return Ok(Reviewed::Run(current)),
                GateDecision::Reject { reason } => {
                    tracing::warn!(tool = %current.name, reason = %reason, "rejected by human");
                    self.events.send(AgentEvent::Finished {
                        reason: "human_interrupted".to_string(),
                    });
                    return Err(OrchestratorError::HumanInterrupted {
                        reason,
                        session: Box::new(session),
                    });
                }
                GateDecision::Skip { reason } => return Ok(Reviewed::Skip(current, reason)),
                GateDecision::Replace(replacement) => {
                    tracing::info!(from = %current.name, to = %replacement.name, "tool call replaced by reviewer");
                    return Ok(Reviewed::Run(replacement.refresh_call_id()));
                }
                GateDecision::Adjust { feedback } => {
                    if adjustments >= max {
                        return Ok(Reviewed::Run(current));
                    }
                    adjustments += 1;
                    tracing::info!(tool = %current.name, attempt = adjustments, "adjusting tool call");
                    let proposal = selector.adjust(conv, &current, &feedback).await?;
                    if let Some(next) = proposal.choices.into_iter().next() {
                        current = next;
                    }
                    if adjustments >= max {
                        tracing::warn!(
                            tool = %current.name,
                            "adjustment attempts exhausted, accepting last proposal"
                        );
                        return Ok(Reviewed::Run(current));
                    }
                }
            }
        }
    }

    async fn execute(&self, executor: &ToolExecutor, choices: &[ToolChoice]) -> Vec<ToolOutcome> {
        if self.options.parallel_tools {
            return execute_batch(executor, choices).await;
        }
        let mut outcomes = Vec::with_capacity(choices.len());
        for choice in choices {
            outcomes.push(executor.execute(choice).await);
        }
        outcomes
    }

    /// 无法判断时视为需要工具
    async fn prepass(&self, protocol: &DecisionProtocol<'_>, conv: &Conversation) -> Result<bool, OrchestratorError> {
        self.events.send(AgentEvent::Thinking {
            stage: "prepass".to_string(),
        });
        let mut messages = conv.messages().to_vec();
        messages.push(Message::user(prompt::prepass_question(&self.registry.definitions())));
        let answer = protocol.ask_text(&messages).await?;
        let needed = prompt::parse_yes_no(&answer).unwrap_or(true);
        tracing::debug!(needed, answer = %answer, "pre-pass");
        Ok(needed)
    }

    /// 无法判断时视为不需要规划
    async fn wants_plan(&self, protocol: &DecisionProtocol<'_>, conv: &Conversation) -> Result<bool, OrchestratorError> {
        self.events.send(AgentEvent::Thinking {
            stage: "planning".to_string(),
        });
        let mut messages = conv.messages().to_vec();
        messages.push(Message::user(prompt::planning_question()));
        let answer = protocol.ask_text(&messages).await?;
        Ok(prompt::parse_yes_no(&answer).unwrap_or(false))
    }

    fn check_cancel(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            self.events.send(AgentEvent::Finished {
                reason: "cancelled".to_string(),
            });
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn finish(&self, reason: &str) {
        tracing::info!(reason, "orchestration finished");
        self.events.send(AgentEvent::Finished {
            reason: reason.to_string(),
        });
    }
}

fn first_reasoning(choices: &[ToolChoice]) -> String {
    choices
        .iter()
        .map(|c| c.reasoning.as_str())
        .find(|r| !r.trim().is_empty())
        .unwrap_or_default()
        .to_string()
}

fn skipped_result(reason: Option<&str>) -> String {
    match reason {
        Some(r) if !r.trim().is_empty() => format!("Skipped by reviewer: {r}"),
        _ => "Skipped by reviewer".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, ScriptedLlmClient};
    use crate::tools::EchoTool;

    fn orchestrator(llm: ScriptedLlmClient, options: OrchestratorOptions) -> Orchestrator {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        Orchestrator::new(Arc::new(llm), Arc::new(reg), options)
    }

    fn conversation() -> Conversation {
        let mut conv = Conversation::new();
        conv.push(Message::user("echo hello")).unwrap();
        conv
    }

    #[tokio::test]
    async fn test_single_round_appends_call_and_result() {
        let llm = ScriptedLlmClient::sequence(vec![Ok(CompletionResponse::tool_call(
            "echo",
            serde_json::json!({"text": "hello"}),
        ))]);
        let orch = orchestrator(llm, OrchestratorOptions::default());
        let input = conversation();
        let out = orch.run(&input).await.unwrap();

        assert_eq!(input.len(), 1);
        assert_eq!(out.len(), 3);
        assert_eq!(out.messages()[2].content, "hello");
        assert_eq!(out.status.iteration, 1);
        assert!(out.status.has_invoked("echo"));
    }

    #[tokio::test]
    async fn test_prepass_no_returns_no_selection() {
        let llm = ScriptedLlmClient::sequence(vec![Ok(CompletionResponse::text("No."))]);
        let options = OrchestratorOptions {
            prepass: true,
            ..OrchestratorOptions::default()
        };
        let orch = orchestrator(llm, options);
        let err = orch.run(&conversation()).await.unwrap_err();
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_cancelled_before_first_round() {
        let llm = ScriptedLlmClient::sequence(vec![Ok(CompletionResponse::text("x"))]);
        let orch = orchestrator(llm, OrchestratorOptions::default());
        orch.cancel_token().cancel();
        assert!(matches!(
            orch.run(&conversation()).await,
            Err(OrchestratorError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_result_callback_rewrites_result() {
        let llm = ScriptedLlmClient::sequence(vec![Ok(CompletionResponse::tool_call(
            "echo",
            serde_json::json!({"text": "hello"}),
        ))]);
        let orch = orchestrator(llm, OrchestratorOptions::default())
            .with_result_callback(Arc::new(|_, r| r.to_uppercase()));
        let out = orch.run(&conversation()).await.unwrap();
        assert_eq!(out.messages()[2].content, "HELLO");
        assert_eq!(out.status.outcomes[0].result, "HELLO");
    }
}
