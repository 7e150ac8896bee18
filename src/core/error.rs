//! 编排错误类型
//!
//! 只有 LoopDetected、HumanInterrupted、重试耗尽后的 DecisionMalformed 作为终止错误交给调用方；
//! 工具执行失败会被转成结果文本写回对话，不在这里出现。

use thiserror::Error;

use crate::orchestrator::SessionState;

/// 对话追加校验失败
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("tool result message has no call id")]
    MissingCallId,

    #[error("tool result references unknown call id: {0}")]
    UnknownCallId(String),
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// 整个运行中没有提出任何工具（通常意味着应直接回答）
    #[error("No tool selected")]
    NoSelection { reasoning: String },

    #[error("Loop detected: `{tool}` called {count} times with arguments {arguments}")]
    LoopDetected {
        tool: String,
        arguments: String,
        count: usize,
    },

    /// 人工审批拒绝；session 可持久化后通过 resume 继续
    #[error("Interrupted by human: {reason}")]
    HumanInterrupted {
        reason: String,
        session: Box<SessionState>,
    },

    #[error("Malformed decision after {attempts} attempts: {last_error}")]
    DecisionMalformed { attempts: usize, last_error: String },

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid conversation: {0}")]
    Conversation(#[from] ConversationError),

    #[error("Planning failed: {0}")]
    Planning(String),
}

impl OrchestratorError {
    /// NoSelection 可恢复（调用方直接回答即可），其余均为终止
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OrchestratorError::NoSelection { .. })
    }

    /// 事件/日志中使用的短名称
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NoSelection { .. } => "no_selection",
            OrchestratorError::LoopDetected { .. } => "loop_detected",
            OrchestratorError::HumanInterrupted { .. } => "human_interrupted",
            OrchestratorError::DecisionMalformed { .. } => "decision_malformed",
            OrchestratorError::Cancelled => "cancelled",
            OrchestratorError::Conversation(_) => "conversation",
            OrchestratorError::Planning(_) => "planning",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_no_selection_is_recoverable() {
        assert!(OrchestratorError::NoSelection { reasoning: String::new() }.is_recoverable());
        assert!(!OrchestratorError::Cancelled.is_recoverable());
        let err = OrchestratorError::LoopDetected {
            tool: "search".into(),
            arguments: "{}".into(),
            count: 3,
        };
        assert!(!err.is_recoverable());
        assert_eq!(err.kind(), "loop_detected");
        assert!(err.to_string().contains("search"));
    }
}
