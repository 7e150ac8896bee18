//! 工具参数 Schema 与解码（schemars 自动生成工具 Schema）
//!
//! 类型化参数结构通过反射生成 JSON Schema：字段文档注释成为 description，枚举成为 enum，Option 字段为可选。
//! decode_args 是无类型参数进入类型化工具的唯一入口。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// 为参数类型生成工具参数 schema（内联子 schema，去掉 $schema / title）
pub fn schema_for_args<T: JsonSchema>() -> Value {
    let settings = SchemaSettings::draft07().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let schema = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema());
    if let Value::Object(obj) = &mut value {
        obj.remove("title");
        obj.remove("definitions");
        obj.entry("properties")
            .or_insert_with(|| Value::Object(Map::new()));
    }
    value
}

pub fn empty_object_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// 空载荷（null / 空字符串 / 缺失）统一视为 {}
pub fn normalize_args(args: Value) -> Value {
    match args {
        Value::Null => Value::Object(Map::new()),
        Value::String(s) if s.trim().is_empty() => Value::Object(Map::new()),
        other => other,
    }
}

/// 原始参数字符串解析为对象；空串视为 {}，非对象 JSON 报错
pub fn parse_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    let value: Value =
        serde_json::from_str(raw).map_err(|e| format!("arguments are not valid JSON: {e}"))?;
    match normalize_args(value) {
        Value::Object(map) => Ok(map),
        other => Err(format!("arguments must be a JSON object, got {other}")),
    }
}

/// 将无类型参数解码为工具的参数类型
pub fn decode_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(normalize_args(args)).map_err(|e| format!("invalid arguments: {e}"))
}
