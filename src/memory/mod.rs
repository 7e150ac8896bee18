//! 对话数据模型：消息、对话、执行状态、工具选择

pub mod choice;
pub mod conversation;
pub mod status;

pub use choice::{new_call_id, ToolChoice};
pub use conversation::{ContentPart, Conversation, Message, Role, ToolCall};
pub use status::{canonical_arguments, PastAction, Status, ToolOutcome, PAST_ACTION_WINDOW};
