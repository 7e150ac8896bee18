//! Hive - Rust 智能体编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、编排器构建器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 对话、消息、执行状态、工具选择
//! - **observability**: tracing 初始化与推理日志
//! - **orchestrator**: 决策协议、准则、工具选择、人工审批、循环检测、并行执行与主循环
//! - **tools**: Tool 抽象、注册表、参数 Schema、函数 / 远程工具与执行器

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod orchestrator;
pub mod tools;

pub use crate::core::{OrchestratorBuilder, OrchestratorError};
pub use memory::{Conversation, Message, ToolChoice};
pub use orchestrator::{Orchestrator, OrchestratorOptions};
