//! 编排核心：决策协议、准则过滤、工具选择、人工审批、循环检测、并行执行与主循环

pub mod decision;
pub mod events;
pub mod gate;
pub mod guideline;
pub mod intention;
pub mod loop_;
pub mod loop_detect;
pub mod parallel;
pub mod planning;
pub mod prompt;
pub mod selection;

pub use decision::{Decision, DecisionProtocol};
pub use events::{AgentEvent, EventSink};
pub use gate::{AutoApprove, GateDecision, HumanGate, SessionState};
pub use guideline::Guideline;
pub use intention::{Intention, IntentionFallback, MarkerFallback, INTENTION_TOOL, NO_TOOL};
pub use loop_::{Orchestrator, OrchestratorOptions, ResultCallback, StatusObserver};
pub use loop_detect::LoopDetector;
pub use planning::{PlanReport, PlanningHook, SequentialPlan};
pub use prompt::PromptContext;
pub use selection::{SelectionMode, SelectionOutcome, ToolSelector};
