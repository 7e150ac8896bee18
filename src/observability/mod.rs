//! 可观测性：tracing 初始化与推理日志收集器
//!
//! ReasoningLog 由调用方显式创建并注入编排器（start / finish 生命周期），不使用全局单例，
//! 因此多个独立运行（含测试）互不干扰。

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 推理日志接收端
pub trait ReasoningSink: Send + Sync {
    /// stage 为 selection / intention / reevaluation / adjustment 等阶段名
    fn record(&self, stage: &str, text: &str);
}

#[derive(Clone, Debug, Serialize)]
pub struct ReasoningEntry {
    pub at: DateTime<Utc>,
    pub stage: String,
    pub text: String,
}

/// 内存推理日志：start 之后才记录，finish 取出全部条目并停止记录
#[derive(Debug, Default)]
pub struct ReasoningLog {
    inner: Mutex<ReasoningLogInner>,
}

#[derive(Debug, Default)]
struct ReasoningLogInner {
    active: bool,
    entries: Vec<ReasoningEntry>,
}

impl ReasoningLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active = true;
        inner.entries.clear();
    }

    pub fn finish(&self) -> Vec<ReasoningEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.active = false;
        std::mem::take(&mut inner.entries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReasoningSink for ReasoningLog {
    fn record(&self, stage: &str, text: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.active {
            return;
        }
        inner.entries.push(ReasoningEntry {
            at: Utc::now(),
            stage: stage.to_string(),
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_records_only_between_start_and_finish() {
        let log = ReasoningLog::new();
        log.record("selection", "ignored");
        assert!(log.is_empty());

        log.start();
        log.record("selection", "pick echo");
        log.record("reevaluation", "done");
        let entries = log.finish();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, "selection");

        log.record("selection", "after finish");
        assert!(log.is_empty());
    }
}
