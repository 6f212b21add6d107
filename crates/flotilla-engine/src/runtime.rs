//! Engine Runtime seam
//!
//! The runtime owns the heavy parts of an engine: the render pipeline, the
//! asset manager, the snapshot data and the script isolates. Flotilla only
//! decides when they are created, shared and released.
use crate::components::SharedComponents;
use flotilla_core::FlotillaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Entrypoint used when a launch names none
pub const DEFAULT_ENTRYPOINT: &str = "main";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("RUNTIME/create failed for {label}: {reason}")]
    CreateFailed { label: String, reason: String },

    #[error("RUNTIME/isolate spawn failed for {label}: {reason}")]
    SpawnFailed { label: String, reason: String },

    #[error("RUNTIME/run failed for {label}: {reason}")]
    RunFailed { label: String, reason: String },
}

impl From<RuntimeError> for FlotillaError {
    fn from(err: RuntimeError) -> Self {
        FlotillaError::Runtime(err.to_string())
    }
}

/// Entrypoint, initial route and arguments handed to an isolate on run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_route: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl LaunchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_initial_route(mut self, route: impl Into<String>) -> Self {
        self.initial_route = Some(route.into());
        self
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Effective entrypoint; empty names fall back to [`DEFAULT_ENTRYPOINT`]
    pub fn entrypoint(&self) -> &str {
        self.entrypoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_ENTRYPOINT)
    }
}

/// An independent script execution environment. Never shared between
/// engine contexts.
pub trait ScriptIsolate: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    fn is_running(&self) -> bool;

    /// Start executing `launch.entrypoint()`.
    fn run(&mut self, launch: &LaunchConfig) -> Result<(), RuntimeError>;

    /// Stop the isolate. Called once, on destroy.
    fn shutdown(&mut self);
}

/// Fresh components plus the isolate of a brand-new engine
#[derive(Debug)]
pub struct RuntimeInstance {
    pub components: SharedComponents,
    pub isolate: Box<dyn ScriptIsolate>,
}

pub trait EngineRuntime: Send + Sync {
    /// Allocate components and an isolate for a root engine.
    fn create(&self, label: &str, allow_headless: bool) -> Result<RuntimeInstance, RuntimeError>;

    /// New isolate for a fork that reuses `shared`.
    fn spawn_isolate(
        &self,
        label: &str,
        allow_headless: bool,
        shared: &SharedComponents,
    ) -> Result<Box<dyn ScriptIsolate>, RuntimeError>;

    fn run_with_entrypoint(
        &self,
        isolate: &mut dyn ScriptIsolate,
        launch: &LaunchConfig,
    ) -> Result<(), RuntimeError> {
        isolate.run(launch)
    }
}
