//! 循环检测：同名同参的调用累计达到阈值即中止
//!
//! 在每次执行前检查；本次算作第 count + 1 次，达到 threshold 时返回 LoopDetected。threshold 为 0 表示关闭。
//! 动作历史经 record 写入，窗口不小于阈值，任何阈值都能被触发。

use crate::core::OrchestratorError;
use crate::memory::{PastAction, Status, ToolChoice, PAST_ACTION_WINDOW};

#[derive(Clone, Copy, Debug)]
pub struct LoopDetector {
    threshold: usize,
}

impl LoopDetector {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// 历史窗口大小
    pub fn window(&self) -> usize {
        PAST_ACTION_WINDOW.max(self.threshold)
    }

    pub fn check(&self, status: &Status, choice: &ToolChoice) -> Result<(), OrchestratorError> {
        if self.threshold == 0 {
            return Ok(());
        }
        let action = PastAction::new(&choice.name, &choice.arguments);
        let count = status.count_identical(&action) + 1;
        if count >= self.threshold {
            return Err(OrchestratorError::LoopDetected {
                tool: action.name,
                arguments: action.arguments,
                count,
            });
        }
        Ok(())
    }

    /// 记录一次已放行的调用
    pub fn record(&self, status: &mut Status, choice: &ToolChoice) {
        status.record_action(PastAction::new(&choice.name, &choice.arguments), self.window());
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn choice(q: &str) -> ToolChoice {
        ToolChoice::new("search", json!({ "q": q }).as_object().cloned().unwrap())
    }

    #[test]
    fn test_aborts_on_threshold_attempt() {
        let detector = LoopDetector::new(3);
        let mut status = Status::default();
        for _ in 0..2 {
            detector.check(&status, &choice("rust")).unwrap();
            detector.record(&mut status, &choice("rust"));
        }
        match detector.check(&status, &choice("rust")) {
            Err(OrchestratorError::LoopDetected { count, tool, .. }) => {
                assert_eq!(count, 3);
                assert_eq!(tool, "search");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(detector.check(&status, &choice("go")).is_ok());
    }

    #[test]
    fn test_zero_threshold_disables() {
        let detector = LoopDetector::new(0);
        let mut status = Status::default();
        let c = choice("rust");
        for _ in 0..10 {
            detector.record(&mut status, &c);
        }
        assert!(detector.check(&status, &c).is_ok());
    }

    #[test]
    fn test_threshold_above_default_window_still_fires() {
        let detector = LoopDetector::new(100);
        assert_eq!(detector.window(), 100);
        let mut status = Status::default();
        let c = choice("rust");
        for _ in 0..99 {
            detector.check(&status, &c).unwrap();
            detector.record(&mut status, &c);
        }
        match detector.check(&status, &c) {
            Err(OrchestratorError::LoopDetected { count, .. }) => assert_eq!(count, 100),
            other => panic!("unexpected {other:?}"),
        }

        for _ in 0..400 {
            detector.record(&mut status, &c);
        }
        assert_eq!(status.past_actions.len(), 100);
        assert!(detector.check(&status, &c).is_err());
    }
}
