//! 函数工具：把任意类型化的异步函数包装为 Tool
//!
//! 参数 schema 默认由参数类型反射生成，也可显式提供；执行前先经 decode_args 解码。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::tools::schema::{decode_args, schema_for_args};
use crate::tools::Tool;

pub struct FnTool<A, F> {
    name: String,
    description: String,
    schema: Value,
    func: F,
    _args: PhantomData<fn(A)>,
}

impl<A, F, Fut> FnTool<A, F>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, description: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema: schema_for_args::<A>(),
            func,
            _args: PhantomData,
        }
    }

    /// 使用显式 schema 覆盖反射结果
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }
}

#[async_trait]
impl<A, F, Fut> Tool for FnTool<A, F>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let typed: A = decode_args(args).map_err(|e| format!("{}: {}", self.name, e))?;
        (self.func)(typed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        /// 第一个加数
        a: i64,
        /// 第二个加数
        b: i64,
    }

    fn add_tool() -> FnTool<AddArgs, impl Fn(AddArgs) -> std::future::Ready<Result<String, String>>> {
        FnTool::new("add", "Add two integers", |args: AddArgs| {
            std::future::ready(Ok((args.a + args.b).to_string()))
        })
    }

    #[tokio::test]
    async fn test_typed_execution() {
        let tool = add_tool();
        let out = tool.execute(serde_json::json!({"a": 2, "b": 40})).await.unwrap();
        assert_eq!(out, "42");
        assert_eq!(tool.parameters_schema()["properties"]["a"]["description"], "第一个加数");
    }

    #[tokio::test]
    async fn test_decode_error_names_tool() {
        let tool = add_tool();
        let err = tool.execute(serde_json::json!({"a": "x"})).await.unwrap_err();
        assert!(err.starts_with("add:"));
    }
}
