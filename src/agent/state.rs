//! 单次运行的共享可变状态
//!
//! 由工作流独占持有，按 `&mut` 依次借给 Agent 回合与工具处理器；同一时刻只有一个借用者，无需加锁。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// 完成标记中提取的任务总结；非空即表示 Agent 宣告完成，之后不再覆盖
    summary: String,
    /// 沙箱路径 -> 最近一次写入的内容
    pub files: BTreeMap<String, String>,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.is_empty()
    }

    /// 仅当 summary 仍为空时写入；返回是否写入
    pub fn set_summary_once(&mut self, summary: impl Into<String>) -> bool {
        if self.has_summary() {
            return false;
        }
        let summary = summary.into();
        if summary.is_empty() {
            return false;
        }
        self.summary = summary;
        true
    }

    /// 合并一批成功写入的文件，同路径后写覆盖先写
    pub fn merge_files(&mut self, written: BTreeMap<String, String>) {
        self.files.extend(written);
    }

    /// 注入提示词的状态摘要：已写入的文件路径列表
    pub fn context_block(&self) -> String {
        if self.files.is_empty() {
            return "No files have been written yet.".to_string();
        }
        let paths: Vec<&str> = self.files.keys().map(String::as_str).collect();
        format!("Files written so far:\n- {}", paths.join("\n- "))
    }
}
