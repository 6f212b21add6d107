//! Unified Error Model
//!
//! Configuration and lifecycle errors are fatal for the operation that hit
//! them. [`ModuleError`] is different: it is recorded against a module in the
//! init report and never aborts sibling modules.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CONFIG/cycle: {}", chain.join(" -> "))]
    CyclicModule { chain: Vec<String> },

    #[error("CONFIG/already initialized: engine {engine}")]
    AlreadyInitialized { engine: String },

    #[error("CONFIG/async init already started: engine {engine}")]
    AsyncInitAlreadyStarted { engine: String },

    #[error("CONFIG/phase order: {0}")]
    PhaseOrder(String),

    #[error("CONFIG/fork from destroyed engine {label}")]
    ForkFromDestroyed { label: String },

    #[error("CONFIG/duplicate engine label {label}")]
    DuplicateEngineLabel { label: String },

    #[error("CONFIG/unknown engine {label}")]
    UnknownEngine { label: String },

    #[error("CONFIG/no root module recorded for re-registration")]
    MissingRootModule,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("LIFECYCLE/engine {label} is {state}, expected running")]
    NotRunning { label: String, state: String },

    #[error("LIFECYCLE/engine {label} still has live forks: {}", children.join(", "))]
    LiveForks { label: String, children: Vec<String> },

    #[error("LIFECYCLE/engine {label} is already running")]
    AlreadyRunning { label: String },

    #[error("LIFECYCLE/engine {label} is destroyed")]
    Destroyed { label: String },

    #[error("LIFECYCLE/async init timed out after {timeout_ms}ms, pending: {}", pending.join(", "))]
    AsyncInitTimedOut { timeout_ms: u64, pending: Vec<String> },
}

/// Failure of a single module's init hook
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("MODULE/failed: {0}")]
    Failed(String),

    #[error("MODULE/panicked during async init")]
    Panicked,

    #[error("MODULE/completion dropped without a result")]
    Dropped,
}

impl ModuleError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

#[derive(Error, Debug)]
pub enum FlotillaError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Page(#[from] flotilla_pages::PageError),

    /// Failure reported by the engine runtime, already carrying its prefix
    #[error("{0}")]
    Runtime(String),
}
