//! 执行状态：随对话创建，由编排循环原地更新，运行中途不重置

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::ToolDefinition;

/// 最近动作窗口的默认大小；循环检测阈值更大时按阈值保留
pub const PAST_ACTION_WINDOW: usize = 64;

/// 单次工具调用的结果
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub result: String,
    pub success: bool,
    #[serde(default)]
    pub attempts: usize,
}

/// 循环检测用的历史动作：工具名 + 参数的规范化字符串
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PastAction {
    pub name: String,
    pub arguments: String,
}

impl PastAction {
    pub fn new(name: &str, arguments: &Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            arguments: canonical_arguments(arguments),
        }
    }
}

/// serde_json 的 Map 默认按键排序，to_string 即为稳定表示
pub fn canonical_arguments(arguments: &Map<String, Value>) -> String {
    Value::Object(arguments.clone()).to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// 已执行的轮数
    pub iteration: usize,
    /// 调用过的工具定义（按名去重）
    pub invoked_tools: Vec<ToolDefinition>,
    pub outcomes: Vec<ToolOutcome>,
    pub past_actions: Vec<PastAction>,
    pub reasoning_log: Vec<String>,
}

impl Status {
    pub fn record_invoked(&mut self, def: &ToolDefinition) {
        if !self.invoked_tools.iter().any(|d| d.name == def.name) {
            self.invoked_tools.push(def.clone());
        }
    }

    /// 记录一次动作，只保留最近 window 条
    pub fn record_action(&mut self, action: PastAction, window: usize) {
        self.past_actions.push(action);
        if self.past_actions.len() > window {
            let overflow = self.past_actions.len() - window;
            self.past_actions.drain(..overflow);
        }
    }

    /// 与给定动作完全相同的历史条数
    pub fn count_identical(&self, action: &PastAction) -> usize {
        self.past_actions.iter().filter(|a| *a == action).count()
    }

    pub fn has_invoked(&self, name: &str) -> bool {
        self.invoked_tools.iter().any(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_canonical_arguments_ignore_key_order() {
        let a = PastAction::new("search", &args(json!({"q": "rust", "limit": 3})));
        let b = PastAction::new("search", &args(json!({"limit": 3, "q": "rust"})));
        assert_eq!(a, b);
    }

    #[test]
    fn test_past_action_window_is_bounded() {
        let mut status = Status::default();
        for i in 0..(PAST_ACTION_WINDOW + 10) {
            status.record_action(PastAction::new("t", &args(json!({ "i": i }))), PAST_ACTION_WINDOW);
        }
        assert_eq!(status.past_actions.len(), PAST_ACTION_WINDOW);
        assert_eq!(status.past_actions[0].arguments, r#"{"i":10}"#);
    }
}
