//! 核心层：错误类型与编排器装配

pub mod builder;
pub mod error;

pub use builder::{create_llm_from_config, create_orchestrator_builder, OrchestratorBuilder};
pub use error::{ConversationError, OrchestratorError};
