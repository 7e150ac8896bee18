//! 准则：条件 / 动作规则 + 关联工具子集，用于在每轮选择前过滤可见工具
//!
//! 匹配由 LLM 完成（逗号分隔的 ID，容错解析）；严格模式下只暴露已匹配准则的工具与未被任何准则管控的工具，
//! 非严格模式下工具全部可见，匹配到的准则只写入提示。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::OrchestratorError;
use crate::memory::{Message, Status};
use crate::orchestrator::decision::DecisionProtocol;
use crate::orchestrator::prompt;
use crate::tools::ToolRegistry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guideline {
    pub id: String,
    pub condition: String,
    pub action: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl Guideline {
    pub fn new(
        id: impl Into<String>,
        condition: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            condition: condition.into(),
            action: action.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// 关联工具均未被调用过
    pub fn is_unconsumed(&self, status: &Status) -> bool {
        !self.tools.is_empty() && !self.tools.iter().any(|t| status.has_invoked(t))
    }
}

/// 询问 LLM 哪些准则适用
pub async fn match_guidelines(
    protocol: &DecisionProtocol<'_>,
    messages: &[Message],
    guidelines: &[Guideline],
) -> Result<Vec<Guideline>, OrchestratorError> {
    if guidelines.is_empty() {
        return Ok(Vec::new());
    }
    let mut request = vec![Message::system(prompt::guideline_match(guidelines))];
    request.extend(messages.iter().cloned());
    let reply = protocol.ask_text(&request).await?;
    let matched = parse_matched(&reply, guidelines);
    tracing::debug!(matched = ?matched.iter().map(|g| &g.id).collect::<Vec<_>>(), "guidelines matched");
    Ok(matched)
}

/// 容错解析 ID 列表：大小写不敏感，允许逗号 / 空白 / 换行分隔，保留准则原顺序
pub fn parse_matched(reply: &str, guidelines: &[Guideline]) -> Vec<Guideline> {
    let ids: HashSet<String> = reply
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(|s| {
            s.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
                .to_lowercase()
        })
        .filter(|s| !s.is_empty())
        .collect();
    guidelines
        .iter()
        .filter(|g| ids.contains(&g.id.to_lowercase()))
        .cloned()
        .collect()
}

/// 计算本轮可见的工具集合
pub fn visible_tools(
    registry: &ToolRegistry,
    all: &[Guideline],
    matched: &[Guideline],
    strict: bool,
) -> ToolRegistry {
    if !strict || all.is_empty() {
        return registry.clone();
    }
    let gated: HashSet<&str> = all.iter().flat_map(|g| g.tools.iter().map(String::as_str)).collect();
    let allowed: HashSet<&str> = matched
        .iter()
        .flat_map(|g| g.tools.iter().map(String::as_str))
        .collect();
    let names: Vec<String> = registry
        .tool_names()
        .into_iter()
        .filter(|n| !gated.contains(n.as_str()) || allowed.contains(n.as_str()))
        .collect();
    registry.subset(&names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{FnTool, ToolDefinition};

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        for name in ["weather", "refund", "echo"] {
            reg.register(FnTool::new(name, name, |_: serde_json::Value| async {
                Ok::<_, String>(String::new())
            }));
        }
        reg
    }

    fn guidelines() -> Vec<Guideline> {
        vec![
            Guideline::new("weather", "asks about weather", "look it up").with_tools(["weather"]),
            Guideline::new("refund", "asks for a refund", "issue it").with_tools(["refund"]),
        ]
    }

    #[test]
    fn test_parse_matched_is_tolerant() {
        let g = guidelines();
        let m = parse_matched("Refund,\n `weather`.", &g);
        assert_eq!(m.len(), 2);
        assert_eq!(m[0].id, "weather");
        assert!(parse_matched("none", &g).is_empty());
    }

    #[test]
    fn test_strict_hides_unmatched_gated_tools() {
        let reg = registry();
        let g = guidelines();
        let visible = visible_tools(&reg, &g, &g[..1], true);
        assert_eq!(visible.tool_names(), vec!["weather", "echo"]);
        let all = visible_tools(&reg, &g, &[], false);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_unconsumed_until_tool_invoked() {
        let g = &guidelines()[0];
        let mut status = Status::default();
        assert!(g.is_unconsumed(&status));
        status.record_invoked(&ToolDefinition {
            name: "weather".into(),
            description: String::new(),
            parameters: serde_json::json!({}),
        });
        assert!(!g.is_unconsumed(&status));
    }
}
