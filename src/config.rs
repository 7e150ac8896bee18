//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__ORCHESTRATOR__MAX_ROUNDS=3`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::orchestrator::{Guideline, OrchestratorOptions, PromptContext};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub guidelines: Vec<Guideline>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 覆盖默认系统提示词的文件路径
    pub system_prompt_file: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [orchestrator] 段：与 OrchestratorOptions 一一对应
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_rounds: usize,
    pub decision_retries: usize,
    pub execution_retries: usize,
    pub max_adjustment_attempts: usize,
    pub loop_threshold: usize,
    pub strict_guidelines: bool,
    pub forced_reasoning: bool,
    pub parallel_tools: bool,
    pub prepass: bool,
    pub system_prompt: Option<String>,
    pub context: Option<String>,
    pub gaps: Vec<String>,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        let d = OrchestratorOptions::default();
        Self {
            max_rounds: d.max_rounds,
            decision_retries: d.decision_retries,
            execution_retries: d.execution_retries,
            max_adjustment_attempts: d.max_adjustment_attempts,
            loop_threshold: d.loop_threshold,
            strict_guidelines: d.strict_guidelines,
            forced_reasoning: d.forced_reasoning,
            parallel_tools: d.parallel_tools,
            prepass: d.prepass,
            system_prompt: None,
            context: None,
            gaps: Vec::new(),
        }
    }
}

impl From<&OrchestratorSection> for OrchestratorOptions {
    fn from(s: &OrchestratorSection) -> Self {
        Self {
            max_rounds: s.max_rounds.max(1),
            decision_retries: s.decision_retries,
            execution_retries: s.execution_retries,
            max_adjustment_attempts: s.max_adjustment_attempts,
            loop_threshold: s.loop_threshold,
            strict_guidelines: s.strict_guidelines,
            forced_reasoning: s.forced_reasoning,
            parallel_tools: s.parallel_tools,
            prepass: s.prepass,
            prompt: PromptContext {
                system_prompt: s.system_prompt.clone(),
                context: s.context.clone(),
                gaps: s.gaps.clone(),
            },
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_options() {
        let cfg = AppConfig::default();
        let opts = OrchestratorOptions::from(&cfg.orchestrator);
        assert_eq!(opts.max_rounds, 1);
        assert_eq!(opts.loop_threshold, 3);
        assert_eq!(cfg.llm.timeouts.request, 60);
        assert!(cfg.guidelines.is_empty());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "mock"

[orchestrator]
max_rounds = 4
parallel_tools = true
gaps = ["release date"]

[[guidelines]]
id = "weather"
condition = "the user asks about weather"
action = "look up the forecast"
tools = ["weather"]
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.orchestrator.max_rounds, 4);
        assert_eq!(cfg.guidelines[0].tools, vec!["weather"]);

        let opts = OrchestratorOptions::from(&cfg.orchestrator);
        assert!(opts.parallel_tools);
        assert_eq!(opts.prompt.gaps, vec!["release date"]);
        assert_eq!(opts.decision_retries, 2);
    }
}
