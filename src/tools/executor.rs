//! 工具执行器
//!
//! 持有 ToolRegistry 与重试次数，execute(choice) 按预算重试；重试耗尽时合成一条描述错误的结果文本，
//! 让 LLM 在下一轮看到失败并自行决定，而不是让本轮失败。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use crate::memory::{ToolChoice, ToolOutcome};
use crate::tools::ToolRegistry;

/// 审计日志中参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    max_retries: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_retries: usize) -> Self {
        Self {
            registry,
            max_retries,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// 执行一次工具调用；失败按预算重试，最终总是返回一个 ToolOutcome
    pub async fn execute(&self, choice: &ToolChoice) -> ToolOutcome {
        let start = Instant::now();
        let args = choice.arguments_value();
        let args_preview = args_preview(&args);

        let Some(tool) = self.registry.get(&choice.name) else {
            tracing::warn!(tool = %choice.name, "tool not found");
            return self.outcome(
                choice,
                format!("Error: tool `{}` is not available", choice.name),
                false,
                0,
            );
        };

        let mut attempts = 0;
        let mut last_error = String::new();
        while attempts <= self.max_retries {
            attempts += 1;
            match tool.execute(args.clone()).await {
                Ok(content) => {
                    audit(&choice.name, true, attempts, start, &args_preview);
                    return self.outcome(choice, content, true, attempts);
                }
                Err(e) => {
                    tracing::warn!(tool = %choice.name, attempt = attempts, error = %e, "tool failed");
                    last_error = e;
                }
            }
        }

        audit(&choice.name, false, attempts, start, &args_preview);
        let result = format!(
            "Error: tool `{}` failed after {} attempt(s): {}",
            choice.name, attempts, last_error
        );
        self.outcome(choice, result, false, attempts)
    }

    fn outcome(&self, choice: &ToolChoice, result: String, success: bool, attempts: usize) -> ToolOutcome {
        ToolOutcome {
            call_id: choice.call_id.clone(),
            name: choice.name.clone(),
            arguments: choice.arguments.clone(),
            result,
            success,
            attempts,
        }
    }
}

fn audit(tool: &str, ok: bool, attempts: usize, start: Instant, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": ok,
        "attempts": attempts,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > ARGS_PREVIEW_CHARS {
        format!("{}...", s.chars().take(ARGS_PREVIEW_CHARS).collect::<String>())
    } else {
        s
    }
}
