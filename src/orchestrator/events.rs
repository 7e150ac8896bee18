//! 编排过程事件：用于流式/SSE 展示选择、审批、执行与重评估

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 新一轮开始
    RoundStarted { round: usize, max_rounds: usize },
    /// 正在调用 LLM（stage：prepass / planning / guidelines / selection / intention / arguments / reevaluation）
    Thinking { stage: String },
    /// LLM 的推理内容
    Reasoning { stage: String, text: String },
    /// 提出的工具调用
    ToolSelected {
        tool: String,
        args: serde_json::Value,
        call_id: String,
    },
    /// 人工审批结果
    GateDecision { tool: String, decision: String },
    /// 决策协议重试
    DecisionRetry { attempt: usize, reason: String },
    /// 工具返回（预览）
    ToolResult {
        tool: String,
        call_id: String,
        success: bool,
        preview: String,
    },
    /// 跳过执行
    ToolSkipped { tool: String, call_id: String },
    /// 循环检测触发
    LoopDetected { tool: String, count: usize },
    /// 运行结束
    Finished { reason: String },
    /// 错误
    Error { text: String },
}

/// 可选的事件通道
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn new(tx: Option<UnboundedSender<AgentEvent>>) -> Self {
        Self { tx }
    }

    pub fn send(&self, ev: AgentEvent) {
        if let Some(t) = &self.tx {
            let _ = t.send(ev);
        }
    }
}

/// Observation 预览最大字符数
const PREVIEW_CHARS: usize = 200;

pub fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_is_tagged() {
        let ev = AgentEvent::ToolSkipped { tool: "echo".into(), call_id: "c".into() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "tool_skipped");
    }

    #[test]
    fn test_preview_truncates_on_chars() {
        let long = "蜂".repeat(PREVIEW_CHARS + 5);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
    }
}
