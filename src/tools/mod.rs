//! 工具层：Tool 抽象、注册表、参数 Schema、函数 / 远程工具适配与执行器

pub mod echo;
pub mod executor;
pub mod function;
pub mod registry;
pub mod remote;
pub mod schema;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use function::FnTool;
pub use registry::{Tool, ToolDefinition, ToolRegistry};
pub use remote::{register_remote_tools, RemoteTool, RemoteToolProvider, RemoteToolResult};
pub use schema::{decode_args, normalize_args, parse_arguments, schema_for_args};
