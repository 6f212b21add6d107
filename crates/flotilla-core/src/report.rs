//! Init Report: what happened while an engine's modules initialized
use crate::error::ModuleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStage {
    Sync,
    Async,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFailure {
    pub module: String,
    pub stage: InitStage,
    pub error: String,
}

impl ModuleFailure {
    pub fn new(module: impl Into<String>, stage: InitStage, error: &ModuleError) -> Self {
        Self {
            module: module.into(),
            stage,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    /// Nothing ran yet
    Idle,
    /// Registration and sync init done; async init not started (preboot)
    Registered,
    /// Async hooks outstanding
    AsyncPending,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub engine: String,
    pub session_id: String,
    pub phase: InitPhase,
    pub preboot: bool,
    /// Modules in the order their sync hooks ran
    pub modules: Vec<String>,
    /// Modules in the order their async hooks reported
    pub async_completed: Vec<String>,
    pub failures: Vec<ModuleFailure>,
    pub phase_a_ms: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl InitReport {
    pub fn new(engine: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            session_id: session_id.into(),
            phase: InitPhase::Idle,
            preboot: false,
            modules: Vec::new(),
            async_completed: Vec::new(),
            failures: Vec::new(),
            phase_a_ms: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == InitPhase::Complete
    }

    /// Complete with no module failure
    pub fn is_clean(&self) -> bool {
        self.is_complete() && self.failures.is_empty()
    }

    /// Distinct failing modules, in the order they failed
    pub fn failed_modules(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for failure in &self.failures {
            if !out.contains(&failure.module.as_str()) {
                out.push(&failure.module);
            }
        }
        out
    }
}
