//! 对话：消息序列 + 执行状态
//!
//! 对话只追加不修改；每条 Tool 结果消息必须引用最近一条 Assistant 消息中的调用 ID。
//! 父对话仅以弱引用保存，用于上下文串联，从不修改也不序列化。

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};

use crate::core::ConversationError;
use crate::memory::Status;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// 多媒体内容片段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
}

/// Assistant 消息中提出的一次工具调用；arguments 为原始 JSON 字符串
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<ContentPart>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 Tool 消息：对应的调用 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// 仅 Tool 消息：工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            parts: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content.into())
    }

    /// 带工具调用的 Assistant 消息
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::new(Role::Assistant, content.into());
        msg.tool_calls = calls;
        msg
    }

    /// 工具结果消息
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(Role::Tool, content.into());
        msg.tool_call_id = Some(call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// 追加多媒体片段
    pub fn with_part(mut self, part: ContentPart) -> Self {
        self.parts.push(part);
        self
    }

    /// 纯文本视图：content 与 Text 片段拼接
    pub fn text(&self) -> String {
        let mut out = self.content.clone();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// 对话：有序消息 + 可选父对话弱引用 + 可变执行状态
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    #[serde(skip)]
    parent: Option<Weak<Conversation>>,
    #[serde(default)]
    pub status: Status,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有消息构建；逐条校验调用关联
    pub fn from_messages(messages: Vec<Message>) -> Result<Self, ConversationError> {
        let mut conv = Self::new();
        for msg in messages {
            conv.push(msg)?;
        }
        Ok(conv)
    }

    /// 子对话：持有父对话弱引用，消息与状态为空
    pub fn child_of(parent: &Arc<Conversation>) -> Self {
        Self {
            messages: Vec::new(),
            parent: Some(Arc::downgrade(parent)),
            status: Status::default(),
        }
    }

    pub fn parent(&self) -> Option<Arc<Conversation>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 追加一条消息；Tool 消息的调用 ID 必须出现在最近一条 Assistant 消息中
    pub fn push(&mut self, msg: Message) -> Result<(), ConversationError> {
        if msg.role == Role::Tool {
            let id = msg
                .tool_call_id
                .as_deref()
                .ok_or(ConversationError::MissingCallId)?;
            if !self.has_call(id) {
                return Err(ConversationError::UnknownCallId(id.to_string()));
            }
        }
        self.messages.push(msg);
        Ok(())
    }

    fn has_call(&self, id: &str) -> bool {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .is_some_and(|m| m.tool_calls.iter().any(|c| c.id == id))
    }

    /// 重新校验整个消息序列（反序列化后使用）
    pub fn validate(&self) -> Result<(), ConversationError> {
        let mut open: &[ToolCall] = &[];
        for msg in &self.messages {
            match msg.role {
                Role::Assistant => open = &msg.tool_calls,
                Role::Tool => {
                    let id = msg
                        .tool_call_id
                        .as_deref()
                        .ok_or(ConversationError::MissingCallId)?;
                    if !open.iter().any(|c| c.id == id) {
                        return Err(ConversationError::UnknownCallId(id.to_string()));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "echo".to_string(),
            arguments: "{}".to_string(),
        }
    }

    #[test]
    fn test_tool_result_requires_known_call() {
        let mut conv = Conversation::new();
        conv.push(Message::user("hi")).unwrap();
        let err = conv
            .push(Message::tool_result("call_1", "echo", "x"))
            .unwrap_err();
        assert!(matches!(err, ConversationError::UnknownCallId(id) if id == "call_1"));

        conv.push(Message::assistant_with_calls("", vec![call("call_1")]))
            .unwrap();
        conv.push(Message::tool_result("call_1", "echo", "x")).unwrap();
        assert_eq!(conv.len(), 3);
    }

    #[test]
    fn test_tool_result_must_answer_latest_assistant() {
        let mut conv = Conversation::new();
        conv.push(Message::assistant_with_calls("", vec![call("call_1")])).unwrap();
        conv.push(Message::tool_result("call_1", "echo", "x")).unwrap();
        conv.push(Message::assistant_with_calls("", vec![call("call_2")])).unwrap();
        let err = conv
            .push(Message::tool_result("call_1", "echo", "again"))
            .unwrap_err();
        assert!(matches!(err, ConversationError::UnknownCallId(id) if id == "call_1"));
        conv.push(Message::tool_result("call_2", "echo", "y")).unwrap();

        let stale = r#"{"messages":[
            {"role":"assistant","content":"","tool_calls":[{"id":"a","name":"echo","arguments":"{}"}]},
            {"role":"assistant","content":"later"},
            {"role":"tool","content":"x","tool_call_id":"a","name":"echo"}]}"#;
        let conv: Conversation = serde_json::from_str(stale).unwrap();
        assert!(conv.validate().is_err());
    }

    #[test]
    fn test_validate_after_deserialize() {
        let json = r#"{"messages":[{"role":"tool","content":"x","tool_call_id":"c9","name":"echo"}]}"#;
        let conv: Conversation = serde_json::from_str(json).unwrap();
        assert!(conv.validate().is_err());
    }

    #[test]
    fn test_parent_is_weak() {
        let parent = Arc::new(Conversation::from_messages(vec![Message::user("root")]).unwrap());
        let child = Conversation::child_of(&parent);
        assert_eq!(child.parent().unwrap().len(), 1);
        drop(parent);
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_text_joins_parts() {
        let msg = Message::user("look")
            .with_part(ContentPart::ImageUrl { url: "http://x/y.png".into() })
            .with_part(ContentPart::Text { text: "and describe".into() });
        assert_eq!(msg.text(), "look\nand describe");
    }
}
