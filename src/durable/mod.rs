//! 持久化执行层：步骤日志与步骤执行器

pub mod journal;
pub mod runner;

pub use journal::{MemoryJournal, SqliteJournal, StepJournal, StepRecord};
pub use runner::StepRunner;
