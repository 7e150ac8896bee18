//! Hive - Rust 智能体编排核心
//!
//! 入口：初始化日志、加载配置、注册演示工具，对命令行给出的问题运行一次编排并输出结果对话（JSON）。

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use schemars::JsonSchema;
use serde::Deserialize;

use hive::core::create_orchestrator_builder;
use hive::memory::{Conversation, Message, ToolChoice};
use hive::observability::{self, ReasoningLog};
use hive::orchestrator::{GateDecision, HumanGate, SessionState};
use hive::tools::{EchoTool, FnTool, ToolRegistry};
use hive::OrchestratorError;

/// Run one tool-orchestration pass over a prompt
#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The user request
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,

    /// Config file (overrides config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Approve every tool call without asking
    #[arg(short, long)]
    yes: bool,

    /// Round budget (overrides config)
    #[arg(long)]
    max_rounds: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CalculatorArgs {
    /// Left operand
    a: f64,
    /// Right operand
    b: f64,
    /// Operation to apply
    op: Operation,
}

async fn calculate(args: CalculatorArgs) -> Result<String, String> {
    let value = match args.op {
        Operation::Add => args.a + args.b,
        Operation::Subtract => args.a - args.b,
        Operation::Multiply => args.a * args.b,
        Operation::Divide if args.b == 0.0 => return Err("division by zero".to_string()),
        Operation::Divide => args.a / args.b,
    };
    Ok(value.to_string())
}

/// 控制台审批：y 执行 / n 拒绝 / s 跳过 / a <反馈> 调整
struct ConsoleGate;

#[async_trait]
impl HumanGate for ConsoleGate {
    async fn review(&self, choice: &ToolChoice, _session: &SessionState) -> GateDecision {
        println!("\n🔧 Proposed tool call: {} {}", choice.name, choice.arguments_value());
        if !choice.reasoning.trim().is_empty() {
            println!("   reasoning: {}", choice.reasoning.trim());
        }
        print!("Run it? [y]es / [n]o / [s]kip / [a]djust <feedback>: ");
        if io::stdout().flush().is_err() {
            return GateDecision::Reject {
                reason: "stdout unavailable".to_string(),
            };
        }

        let line = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            io::stdin().read_line(&mut input).map(|_| input)
        })
        .await;
        let input = match line {
            Ok(Ok(input)) => input,
            _ => {
                return GateDecision::Reject {
                    reason: "no input".to_string(),
                }
            }
        };
        parse_console_answer(&input)
    }
}

fn parse_console_answer(input: &str) -> GateDecision {
    let input = input.trim();
    let (head, rest) = match input.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (input, ""),
    };
    match head.to_lowercase().as_str() {
        "y" | "yes" | "是" | "" => GateDecision::Approve,
        "s" | "skip" => GateDecision::Skip {
            reason: (!rest.is_empty()).then(|| rest.to_string()),
        },
        "a" | "adjust" if !rest.is_empty() => GateDecision::Adjust {
            feedback: rest.to_string(),
        },
        _ => GateDecision::Reject {
            reason: if rest.is_empty() {
                "rejected at console".to_string()
            } else {
                rest.to_string()
            },
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tools.register(FnTool::new(
        "calculator",
        "Apply an arithmetic operation to two numbers.",
        calculate,
    ));

    let reasoning = Arc::new(ReasoningLog::new());
    let mut builder = create_orchestrator_builder(cli.config.clone())
        .with_tools(tools)
        .with_reasoning_sink(reasoning.clone());
    if let Some(max_rounds) = cli.max_rounds {
        let mut options = hive::OrchestratorOptions::from(&builder.config().orchestrator);
        options.max_rounds = max_rounds.max(1);
        builder = builder.with_options(options);
    }
    if !cli.yes {
        builder = builder.with_gate(Arc::new(ConsoleGate));
    }
    let orchestrator = builder.build();

    let mut conversation = Conversation::new();
    conversation
        .push(Message::user(cli.prompt.join(" ")))
        .context("Failed to build conversation")?;

    reasoning.start();
    let result = orchestrator.run(&conversation).await;
    let entries = reasoning.finish();
    tracing::debug!(entries = entries.len(), "reasoning collected");

    match result {
        Ok(conv) => {
            let json = serde_json::to_string_pretty(&conv).context("Failed to serialize conversation")?;
            println!("{json}");
            Ok(())
        }
        Err(OrchestratorError::NoSelection { reasoning }) => {
            println!("No tool needed. {}", reasoning.trim());
            Ok(())
        }
        Err(OrchestratorError::HumanInterrupted { reason, session }) => {
            let json = session.to_json().context("Failed to serialize session")?;
            println!("Interrupted: {reason}\nSession state:\n{json}");
            Ok(())
        }
        Err(e) => Err(e).context("Orchestration failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_answers() {
        assert_eq!(parse_console_answer("y\n"), GateDecision::Approve);
        assert_eq!(
            parse_console_answer("s not now"),
            GateDecision::Skip { reason: Some("not now".into()) }
        );
        assert_eq!(
            parse_console_answer("a use metric units"),
            GateDecision::Adjust { feedback: "use metric units".into() }
        );
        assert!(matches!(parse_console_answer("n"), GateDecision::Reject { .. }));
    }

    #[tokio::test]
    async fn test_calculator() {
        let r = calculate(CalculatorArgs { a: 6.0, b: 3.0, op: Operation::Divide }).await;
        assert_eq!(r.unwrap(), "2");
        let r = calculate(CalculatorArgs { a: 1.0, b: 0.0, op: Operation::Divide }).await;
        assert!(r.is_err());
    }
}
