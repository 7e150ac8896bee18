//! 并行执行：已批准的调用同时执行，每个写入自己的下标槽位，按选择顺序汇总

use futures_util::future::join_all;

use crate::memory::{ToolChoice, ToolOutcome};
use crate::tools::ToolExecutor;

/// 执行一批调用；返回顺序与输入顺序一致，与完成先后无关
pub async fn execute_batch(executor: &ToolExecutor, choices: &[ToolChoice]) -> Vec<ToolOutcome> {
    if let [single] = choices {
        return vec![executor.execute(single).await];
    }
    let mut slots: Vec<Option<ToolOutcome>> = vec![None; choices.len()];
    let finished = join_all(
        choices
            .iter()
            .enumerate()
            .map(|(i, choice)| async move { (i, executor.execute(choice).await) }),
    )
    .await;
    for (i, outcome) in finished {
        slots[i] = Some(outcome);
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use serde::Deserialize;
    use schemars::JsonSchema;

    use crate::tools::{FnTool, ToolRegistry};

    #[derive(Deserialize, JsonSchema)]
    struct SleepArgs {
        ms: u64,
    }

    #[tokio::test]
    async fn test_results_follow_selection_order() {
        let mut reg = ToolRegistry::new();
        reg.register(FnTool::new("sleep", "sleeps", |a: SleepArgs| async move {
            tokio::time::sleep(Duration::from_millis(a.ms)).await;
            Ok::<_, String>(format!("slept {}", a.ms))
        }));
        let executor = ToolExecutor::new(Arc::new(reg), 0);
        let choices: Vec<ToolChoice> = [60u64, 5, 30]
            .iter()
            .map(|ms| {
                ToolChoice::new("sleep", serde_json::json!({ "ms": ms }).as_object().cloned().unwrap())
            })
            .collect();

        let outcomes = execute_batch(&executor, &choices).await;
        let results: Vec<&str> = outcomes.iter().map(|o| o.result.as_str()).collect();
        assert_eq!(results, vec!["slept 60", "slept 5", "slept 30"]);
        for (o, c) in outcomes.iter().zip(&choices) {
            assert_eq!(o.call_id, c.call_id);
        }
    }
}
