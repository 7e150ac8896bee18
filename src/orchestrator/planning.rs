//! 规划钩子：需要先拆解任务时交给外部规划子系统
//!
//! 钩子拿到一个关闭了规划的嵌套编排器，避免规划与编排无限互相调用。

use async_trait::async_trait;

use crate::core::OrchestratorError;
use crate::memory::Conversation;
use crate::orchestrator::Orchestrator;

/// 规划执行报告
#[derive(Clone, Debug, Default)]
pub struct PlanReport {
    pub conversation: Conversation,
    /// 规划过程中是否实际调用过工具
    pub invoked: bool,
}

#[async_trait]
pub trait PlanningHook: Send + Sync {
    async fn execute_plan(
        &self,
        conversation: &Conversation,
        nested: &Orchestrator,
    ) -> Result<PlanReport, OrchestratorError>;
}

/// 按行把计划拆成子任务，逐个交给嵌套编排器
///
/// `steps` 由调用方提供（例如外部规划器的输出）；每步作为一条 User 消息追加后运行一次。
pub struct SequentialPlan {
    steps: Vec<String>,
}

impl SequentialPlan {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PlanningHook for SequentialPlan {
    async fn execute_plan(
        &self,
        conversation: &Conversation,
        nested: &Orchestrator,
    ) -> Result<PlanReport, OrchestratorError> {
        let mut current = conversation.clone();
        let mut invoked = false;
        for (i, step) in self.steps.iter().enumerate() {
            tracing::info!(step = i + 1, total = self.steps.len(), "plan step");
            current.push(crate::memory::Message::user(step.clone()))?;
            match nested.run(&current).await {
                Ok(next) => {
                    invoked |= next.status.outcomes.len() > current.status.outcomes.len();
                    current = next;
                }
                Err(e) if e.is_recoverable() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(PlanReport {
            conversation: current,
            invoked,
        })
    }
}
