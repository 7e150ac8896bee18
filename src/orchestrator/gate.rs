//! 人工审批关口与会话快照
//!
//! 每个待执行的 ToolChoice 在执行前交给 HumanGate 审阅；拒绝时编排中断，
//! 返回的 SessionState 可序列化保存，之后通过 Orchestrator::resume 继续。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{Conversation, ToolChoice};

/// 审阅结果
#[derive(Clone, Debug, PartialEq)]
pub enum GateDecision {
    /// 照常执行
    Approve,
    /// 拒绝并中断本次运行
    Reject { reason: String },
    /// 不执行，写入一条「已跳过」结果
    Skip { reason: Option<String> },
    /// 以给定调用替换
    Replace(ToolChoice),
    /// 附带反馈重新选择
    Adjust { feedback: String },
}

impl GateDecision {
    /// 事件中使用的短名称
    pub fn label(&self) -> &'static str {
        match self {
            GateDecision::Approve => "approve",
            GateDecision::Reject { .. } => "reject",
            GateDecision::Skip { .. } => "skip",
            GateDecision::Replace(_) => "replace",
            GateDecision::Adjust { .. } => "adjust",
        }
    }
}

#[async_trait]
pub trait HumanGate: Send + Sync {
    async fn review(&self, choice: &ToolChoice, session: &SessionState) -> GateDecision;
}

/// 不设关口时的默认实现：全部放行
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl HumanGate for AutoApprove {
    async fn review(&self, _choice: &ToolChoice, _session: &SessionState) -> GateDecision {
        GateDecision::Approve
    }
}

/// 被拦截时的运行快照：待审调用 + 当时的对话
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionState {
    pub pending: ToolChoice,
    pub conversation: Conversation,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(pending: ToolChoice, conversation: Conversation) -> Self {
        Self {
            pending,
            conversation,
            created_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 反序列化并重新校验对话中的调用关联
    pub fn from_json(json: &str) -> Result<Self, String> {
        let state: SessionState = serde_json::from_str(json).map_err(|e| e.to_string())?;
        state
            .conversation
            .validate()
            .map_err(|e| e.to_string())?;
        Ok(state)
    }
}
