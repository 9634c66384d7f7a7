//! 持久化步骤执行器
//!
//! `run(name, f)`：同一 run_id 下，已完成的步骤在续跑时直接返回日志中的结果而不再执行 f；
//! 未完成的步骤执行 f，成功后追加写日志。步骤严格按发出顺序与日志比对，错序或同名并发即终止。

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::AgentError;
use crate::durable::{StepJournal, StepRecord};

#[derive(Debug, Default)]
struct RunnerState {
    /// 续跑前已完成的步骤（按 seq 升序）
    replay: Vec<StepRecord>,
    /// 已消费（回放或新完成）的步骤数，即下一步骤的 seq
    cursor: usize,
    /// 步骤名 -> 已成功发出的次数
    occurrences: HashMap<String, usize>,
    in_flight: HashSet<String>,
}

/// 预留位置：成功后提交，失败时释放
enum Slot {
    Replay(String),
    Execute { key: String, seq: usize },
}

/// 单次运行的步骤执行器
pub struct StepRunner {
    run_id: String,
    journal: Arc<dyn StepJournal>,
    state: Mutex<RunnerState>,
}

impl StepRunner {
    /// 加载 run_id 的已完成步骤，准备回放
    pub async fn resume(
        run_id: impl Into<String>,
        journal: Arc<dyn StepJournal>,
    ) -> Result<Self, AgentError> {
        let run_id = run_id.into();
        let replay = journal.load(&run_id).await?;
        if !replay.is_empty() {
            tracing::info!(run_id = %run_id, completed_steps = replay.len(), "resuming run from journal");
        }
        Ok(Self {
            run_id,
            journal,
            state: Mutex::new(RunnerState {
                replay,
                ..RunnerState::default()
            }),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// 已消费的步骤数
    pub fn completed_steps(&self) -> usize {
        self.state.lock().map(|s| s.cursor).unwrap_or(0)
    }

    /// 执行（或回放）一个具名步骤
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T, AgentError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        match self.reserve(name)? {
            Slot::Replay(output) => {
                tracing::debug!(run_id = %self.run_id, step = %name, "step replayed from journal");
                Ok(serde_json::from_str(&output)?)
            }
            Slot::Execute { key, seq } => {
                let result = f().await;
                self.finish(name, &key, seq, result).await
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RunnerState>, AgentError> {
        self.state
            .lock()
            .map_err(|e| AgentError::Journal(format!("step runner state poisoned: {e}")))
    }

    fn reserve(&self, name: &str) -> Result<Slot, AgentError> {
        let mut state = self.lock()?;
        if state.in_flight.contains(name) {
            return Err(AgentError::DuplicateStep(name.to_string()));
        }

        let occurrence = state.occurrences.get(name).copied().unwrap_or(0);
        let key = if occurrence == 0 {
            name.to_string()
        } else {
            format!("{name}:{occurrence}")
        };

        let seq = state.cursor;
        if let Some(record) = state.replay.get(seq) {
            if record.step_key != key {
                return Err(AgentError::StepOutOfOrder {
                    expected: record.step_key.clone(),
                    found: key,
                });
            }
            let output = record.output.clone();
            state.cursor += 1;
            state.occurrences.insert(name.to_string(), occurrence + 1);
            return Ok(Slot::Replay(output));
        }

        state.in_flight.insert(name.to_string());
        Ok(Slot::Execute { key, seq })
    }

    async fn finish<T: Serialize>(
        &self,
        name: &str,
        key: &str,
        seq: usize,
        result: Result<T, AgentError>,
    ) -> Result<T, AgentError> {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.lock()?.in_flight.remove(name);
                tracing::warn!(run_id = %self.run_id, step = %key, error = %e, "step failed");
                return Err(e);
            }
        };

        let output = serde_json::to_string(&value);
        let record = match output {
            Ok(output) => StepRecord {
                run_id: self.run_id.clone(),
                seq: seq as u64,
                step_key: key.to_string(),
                output,
            },
            Err(e) => {
                self.lock()?.in_flight.remove(name);
                return Err(e.into());
            }
        };

        let appended = self.journal.append(&record).await;
        let mut state = self.lock()?;
        state.in_flight.remove(name);
        appended?;
        state.cursor += 1;
        *state.occurrences.entry(name.to_string()).or_insert(0) += 1;
        drop(state);

        tracing::debug!(run_id = %self.run_id, step = %key, seq, "step completed");
        Ok(value)
    }
}
