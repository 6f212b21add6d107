//! Flotilla Engine: engine contexts and the fork manager
//!
//! An [`EngineGroup`] owns every [`EngineContext`] of a process. The first
//! context gets fresh [`SharedComponents`] from the [`EngineRuntime`]; forks
//! hold `Arc` clones of their parent's and an isolate of their own.
//!
//! ```text
//! main ──fork──▶ main.1 ──fork──▶ main.1.2
//!   └───fork──▶ main.3
//! render pipeline / assets / snapshot: one allocation, four holders
//! ```

pub mod components;
pub mod context;
pub mod group;
pub mod headless;
pub mod runtime;

pub use components::{ComponentInfo, ComponentKind, ComponentResource, SharedComponent, SharedComponents};
pub use context::{EngineContext, EngineState, EngineSummary};
pub use group::{EngineGroup, ForkRequest, RegistrationPolicy, RETIRED_CAPACITY};
pub use headless::{HeadlessIsolate, HeadlessRuntime, LaunchRecord, RuntimeStats};
pub use runtime::{EngineRuntime, LaunchConfig, RuntimeError, RuntimeInstance, ScriptIsolate, DEFAULT_ENTRYPOINT};
