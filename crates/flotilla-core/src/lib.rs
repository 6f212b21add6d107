//! Flotilla Core: Module Registry, Lifecycle Coordinator and Init Report
//!
//! Feature modules implement [`Module`]. A root module declares children,
//! which declare their own, and the [`ModuleRegistry`] turns those
//! declarations into a de-duplicated tree. The [`LifecycleCoordinator`] then
//! initializes the tree for one engine in two phases:
//!
//! ```text
//! Phase A (per module, pre-order)           Phase B (all modules, concurrent)
//! register → page builders → sync init  ⇒  async init ─┐
//!                                           async init ─┼→ InitBarrier → InitReport
//!                                           async init ─┘
//! ```
//!
//! Configuration mistakes (cycles, double init) are [`ConfigError`]s and stop
//! the operation. A module whose init hook fails is only recorded in the
//! [`InitReport`]; its siblings carry on.

pub mod barrier;
pub mod config;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod registry;
pub mod report;

pub use barrier::{BarrierOutcome, CompletionToken, InitBarrier};
pub use config::CoordinatorConfig;
pub use context::ModuleContext;
pub use error::{ConfigError, FlotillaError, LifecycleError, ModuleError};
pub use lifecycle::LifecycleCoordinator;
pub use module::Module;
pub use registry::{ModuleNode, ModuleRegistrar, ModuleRegistry, ModuleTree, NodeId};
pub use report::{InitPhase, InitReport, InitStage, ModuleFailure};

pub use async_trait::async_trait;
pub use flotilla_pages as pages;

/// Flotilla version
pub const FLOTILLA_VERSION: &str = "1.0.0";
