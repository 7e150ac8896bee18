//! 强制推理模式的意图步骤
//!
//! 合成一个 `select_intention` 工具，其参数是候选工具名 + `no_tool` 的封闭枚举（并行模式下为至少一项的数组）。
//! 部分模型不遵守强制选择，意图为空时交给可替换的 IntentionFallback 从推理文本中启发式提取。

use regex::Regex;
use serde_json::{Map, Value};

use crate::memory::ToolChoice;
use crate::tools::ToolDefinition;

/// 「不需要工具」汇点
pub const NO_TOOL: &str = "no_tool";
/// 合成意图工具名
pub const INTENTION_TOOL: &str = "select_intention";

/// 构建意图工具：单选为 `tool` 枚举，多选为 `tools` 数组
pub fn intention_definition(candidates: &[String], multi: bool) -> ToolDefinition {
    let mut names: Vec<Value> = candidates.iter().cloned().map(Value::String).collect();
    let parameters = if multi {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tools": {
                    "type": "array",
                    "description": "Tools to run now",
                    "items": { "type": "string", "enum": names },
                    "minItems": 1
                }
            },
            "required": ["tools"]
        })
    } else {
        names.push(Value::String(NO_TOOL.to_string()));
        serde_json::json!({
            "type": "object",
            "properties": {
                "tool": {
                    "type": "string",
                    "description": format!("The tool to use next, or `{NO_TOOL}`"),
                    "enum": names
                }
            },
            "required": ["tool"]
        })
    };
    ToolDefinition {
        name: INTENTION_TOOL.to_string(),
        description: "Commit to the tool(s) chosen during reasoning.".to_string(),
        parameters,
    }
}

/// 意图步骤的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intention {
    /// 明确选择了 no_tool：结束选择，不走兜底
    Sink,
    /// 选中的候选工具（保持顺序、去重）
    Tools(Vec<String>),
    /// 没有可用的意图（缺字段或全是未知名称），可交给兜底
    Empty,
}

/// 从意图调用中取出工具名；过滤掉非候选名称
pub fn parse_intention(choice: &ToolChoice, candidates: &[String]) -> Intention {
    let raw: Vec<String> = match (choice.arguments.get("tools"), choice.arguments.get("tool")) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        (_, Some(Value::String(s))) => vec![s.clone()],
        _ => Vec::new(),
    };
    let names = filter_candidates(&raw, candidates);
    if !names.is_empty() {
        Intention::Tools(names)
    } else if raw.iter().any(|n| n.trim() == NO_TOOL) {
        Intention::Sink
    } else {
        Intention::Empty
    }
}

fn filter_candidates(raw: &[String], candidates: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in raw {
        let name = name.trim();
        if name == NO_TOOL {
            continue;
        }
        if let Some(c) = candidates.iter().find(|c| c.as_str() == name) {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
    }
    out
}

/// 意图为空时从推理文本中提取工具名的策略
pub trait IntentionFallback: Send + Sync {
    fn extract(&self, reasoning: &str, candidates: &[String]) -> Option<String>;
}

/// 默认兜底：首词匹配 → 决策标记短语 → 「继续等待」类措辞
pub struct MarkerFallback {
    markers: Vec<String>,
    wait_phrases: Vec<String>,
}

impl Default for MarkerFallback {
    fn default() -> Self {
        Self {
            markers: [
                "selected tool:",
                "tool:",
                "i will use",
                "i'll use",
                "use the",
                "call",
                "decision:",
                "next tool:",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            wait_phrases: ["continue waiting", "keep waiting", "wait for", "wait until", "still waiting"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl MarkerFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.markers = markers.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }

    pub fn with_wait_phrases<I, S>(mut self, phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wait_phrases = phrases.into_iter().map(|s| s.into().to_lowercase()).collect();
        self
    }

    fn leading_token(&self, text: &str, candidates: &[String]) -> Option<String> {
        let token: String = text
            .trim_start_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        let token = token.to_lowercase();
        if token.is_empty() || token == NO_TOOL {
            return None;
        }
        candidates.iter().find(|c| c.to_lowercase() == token).cloned()
    }

    fn after_marker(&self, text: &str, candidates: &[String]) -> Option<String> {
        for marker in &self.markers {
            let pattern = format!(r"{}\s*[`'\x22*]*([A-Za-z0-9_\-]+)", regex::escape(marker));
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            for cap in re.captures_iter(text) {
                let word = cap[1].to_lowercase();
                if let Some(c) = candidates.iter().find(|c| c.to_lowercase() == word) {
                    return Some(c.clone());
                }
            }
        }
        None
    }

    fn waiting(&self, text: &str, candidates: &[String]) -> Option<String> {
        if !self.wait_phrases.iter().any(|p| text.contains(p.as_str())) {
            return None;
        }
        candidates
            .iter()
            .find(|c| c.to_lowercase().contains("wait"))
            .cloned()
    }
}

impl IntentionFallback for MarkerFallback {
    fn extract(&self, reasoning: &str, candidates: &[String]) -> Option<String> {
        let lower = reasoning.to_lowercase();
        self.leading_token(&lower, candidates)
            .or_else(|| self.after_marker(&lower, candidates))
            .or_else(|| self.waiting(&lower, candidates))
    }
}

/// 构造意图调用的参数（测试与 Mock 使用）
pub fn intention_arguments(names: &[&str], multi: bool) -> Map<String, Value> {
    let value = if multi {
        serde_json::json!({ "tools": names })
    } else {
        serde_json::json!({ "tool": names.first().copied().unwrap_or(NO_TOOL) })
    };
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<String> {
        vec!["search".into(), "wait_for_job".into(), "echo".into()]
    }

    #[test]
    fn test_definition_enum_includes_sink_only_in_single_mode() {
        let single = intention_definition(&candidates(), false);
        let e = single.parameters["properties"]["tool"]["enum"].as_array().unwrap();
        assert_eq!(e.last().unwrap(), NO_TOOL);
        let multi = intention_definition(&candidates(), true);
        assert_eq!(multi.parameters["properties"]["tools"]["minItems"], 1);
        let items = multi.parameters["properties"]["tools"]["items"]["enum"].as_array().unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn test_parse_intention_distinguishes_sink_from_empty() {
        let c = candidates();
        let single = ToolChoice::new(INTENTION_TOOL, intention_arguments(&[NO_TOOL], false));
        assert_eq!(parse_intention(&single, &c), Intention::Sink);
        let unknown = ToolChoice::new(INTENTION_TOOL, intention_arguments(&["ghost"], false));
        assert_eq!(parse_intention(&unknown, &c), Intention::Empty);
        let missing = ToolChoice::new(INTENTION_TOOL, Map::new());
        assert_eq!(parse_intention(&missing, &c), Intention::Empty);
        let multi = ToolChoice::new(
            INTENTION_TOOL,
            intention_arguments(&["echo", "ghost", "search", "echo"], true),
        );
        assert_eq!(
            parse_intention(&multi, &c),
            Intention::Tools(vec!["echo".into(), "search".into()])
        );
    }

    #[test]
    fn test_fallback_leading_token() {
        let f = MarkerFallback::new();
        assert_eq!(f.extract("Search - the user wants facts", &candidates()), Some("search".into()));
        assert_eq!(f.extract("no_tool: nothing to do", &candidates()), None);
    }

    #[test]
    fn test_fallback_markers_and_wait() {
        let f = MarkerFallback::new();
        assert_eq!(
            f.extract("Looking at this, I will use `echo` to repeat it.", &candidates()),
            Some("echo".into())
        );
        assert_eq!(
            f.extract("The job is still running, so we should continue waiting.", &candidates()),
            Some("wait_for_job".into())
        );
        assert_eq!(f.extract("Nothing applies here.", &candidates()), None);
    }

    #[test]
    fn test_fallback_markers_are_replaceable() {
        let f = MarkerFallback::new().with_markers(["pick ->"]).with_wait_phrases(Vec::<String>::new());
        assert_eq!(f.extract("so: pick -> search", &candidates()), Some("search".into()));
        assert_eq!(f.extract("I will use echo", &candidates()), None);
    }
}
