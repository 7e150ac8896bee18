//! 提示词拼装：选择、意图、参数生成、重评估、调整、预检与规划
//!
//! 模板渲染系统不在编排核心内；这里只做最小的字符串拼装。

use serde::{Deserialize, Serialize};

use crate::memory::{ToolChoice, ToolOutcome};
use crate::orchestrator::guideline::Guideline;
use crate::orchestrator::intention::NO_TOOL;
use crate::tools::ToolDefinition;

/// 工具结果在续写提示中的最大字符数
const RESULT_PROMPT_CHARS: usize = 1200;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a careful assistant that decides whether one of the available tools should be called \
     to make progress on the user's request. Call a tool only when it is actually needed.";

/// 拼进选择提示的上下文
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PromptContext {
    pub system_prompt: Option<String>,
    /// 额外上下文（检索结果、环境描述等）
    pub context: Option<String>,
    /// 内容缺口（由外部审阅流程给出）
    #[serde(default)]
    pub gaps: Vec<String>,
}

/// 选择阶段的 system 提示
pub fn selection_system(
    ctx: &PromptContext,
    tools: &[ToolDefinition],
    guidelines: &[Guideline],
) -> String {
    let mut out = ctx
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    if let Some(context) = ctx.context.as_deref().filter(|c| !c.trim().is_empty()) {
        out.push_str("\n\n## Context\n");
        out.push_str(context);
    }
    if !guidelines.is_empty() {
        out.push_str("\n\n## Guidelines that apply\n");
        for g in guidelines {
            out.push_str(&format!("- When {}: {}", g.condition, g.action));
            if !g.tools.is_empty() {
                out.push_str(&format!(" (tools: {})", g.tools.join(", ")));
            }
            out.push('\n');
        }
    }
    if !ctx.gaps.is_empty() {
        out.push_str("\n\n## Missing information to fill\n");
        for gap in &ctx.gaps {
            out.push_str(&format!("- {gap}\n"));
        }
    }
    out.push_str("\n\n## Available tools\n");
    if tools.is_empty() {
        out.push_str("(none)\n");
    }
    for t in tools {
        out.push_str(&format!("- {}: {}\n", t.name, t.description));
    }
    out
}

/// 强制推理第一步：自由文本推理
pub fn reasoning_request(candidates: &[String]) -> String {
    format!(
        "Think step by step about which single tool, if any, should be used next. \
         Candidates: {}. If no tool is needed, say `{}`. \
         Start your answer with the chosen tool name, then explain briefly.",
        candidates.join(", "),
        NO_TOOL
    )
}

/// 强制推理第二步：按推理结论提交意图
pub fn intention_request(reasoning: &str, multi: bool) -> String {
    let what = if multi {
        "every tool that should run now"
    } else {
        "the tool"
    };
    format!(
        "Based on this reasoning, commit to {what} by calling `select_intention`.\n\nReasoning:\n{reasoning}"
    )
}

/// 已确认工具后生成具体参数
pub fn arguments_request(tool: &ToolDefinition, reasoning: &str) -> String {
    let mut out = format!(
        "Call `{}` now with concrete arguments that follow its schema.",
        tool.name
    );
    if !reasoning.trim().is_empty() {
        out.push_str("\n\nYour earlier reasoning:\n");
        out.push_str(reasoning.trim());
    }
    out
}

/// 重评估：列出本次运行已执行的工具及结果
pub fn continuation(outcomes: &[ToolOutcome]) -> String {
    let mut out = String::from("The following tool calls have been executed so far:\n");
    for (i, o) in outcomes.iter().enumerate() {
        let result: String = o.result.chars().take(RESULT_PROMPT_CHARS).collect();
        out.push_str(&format!(
            "{}. {} {} -> {}{}\n",
            i + 1,
            o.name,
            serde_json::Value::Object(o.arguments.clone()),
            if o.success { "" } else { "[failed] " },
            result
        ));
    }
    out.push_str(
        "\nDecide whether another tool call is needed to complete the request. \
         Do not repeat a call that already succeeded with the same arguments. \
         If the request is complete, answer without calling a tool.",
    );
    out
}

/// 人工要求调整时的再选择提示
pub fn adjustment(choice: &ToolChoice, feedback: &str) -> String {
    format!(
        "A reviewer rejected the proposed call `{}` with arguments {} and asked for an adjustment:\n{}\n\
         Propose an adjusted tool call that addresses this feedback.",
        choice.name,
        choice.arguments_value(),
        feedback
    )
}

/// 预检：是否需要任何工具
pub fn prepass_question(tools: &[ToolDefinition]) -> String {
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    format!(
        "Available tools: {}.\nDoes answering the last user message require calling any of these tools? \
         Reply with exactly `yes` or `no`.",
        names.join(", ")
    )
}

/// 规划钩子：是否需要先拆解任务
pub fn planning_question() -> String {
    "Does the last user request need to be decomposed into several ordered subtasks before acting? \
     Reply with exactly `yes` or `no`."
        .to_string()
}

/// 让 LLM 选出适用的准则 ID
pub fn guideline_match(guidelines: &[Guideline]) -> String {
    let mut out = String::from(
        "You are a guideline matcher. Given the conversation, select the guidelines whose condition applies.\n\
         Reply with ONLY the guideline IDs (comma-separated), or `none`. No explanation.\n\nGuidelines:\n",
    );
    for g in guidelines {
        out.push_str(&format!("- {}: when {}\n", g.id, g.condition));
    }
    out
}

/// 决策畸形时的纠正提示
pub fn correction(defect: &str) -> String {
    format!(
        "Your previous response was invalid: {defect}. \
         Respond with exactly one tool call whose arguments are a single valid JSON object, \
         or plain text if no tool is needed."
    )
}

/// 解析 yes / no 回复；无法判断返回 None
pub fn parse_yes_no(text: &str) -> Option<bool> {
    let first = text
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .split(|c: char| !c.is_alphanumeric())
        .next()?
        .to_lowercase();
    match first.as_str() {
        "yes" | "y" | "true" | "是" => Some(true),
        "no" | "n" | "false" | "否" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yes_no() {
        assert_eq!(parse_yes_no("Yes."), Some(true));
        assert_eq!(parse_yes_no("  **no** because"), Some(false));
        assert_eq!(parse_yes_no("maybe"), None);
        assert_eq!(parse_yes_no(""), None);
    }

    #[test]
    fn test_selection_system_sections() {
        let ctx = PromptContext {
            system_prompt: Some("SYS".into()),
            context: Some("ctx here".into()),
            gaps: vec!["release date".into()],
        };
        let g = Guideline::new("g1", "user asks about weather", "check the forecast")
            .with_tools(["weather"]);
        let tools = vec![ToolDefinition {
            name: "weather".into(),
            description: "forecast".into(),
            parameters: serde_json::json!({}),
        }];
        let s = selection_system(&ctx, &tools, &[g]);
        assert!(s.starts_with("SYS"));
        assert!(s.contains("ctx here"));
        assert!(s.contains("release date"));
        assert!(s.contains("(tools: weather)"));
        assert!(s.contains("- weather: forecast"));
    }

    #[test]
    fn test_continuation_marks_failures() {
        let o = ToolOutcome {
            call_id: "c".into(),
            name: "search".into(),
            arguments: serde_json::Map::new(),
            result: "Error: boom".into(),
            success: false,
            attempts: 2,
        };
        let s = continuation(&[o]);
        assert!(s.contains("1. search {} -> [failed] Error: boom"));
    }
}
