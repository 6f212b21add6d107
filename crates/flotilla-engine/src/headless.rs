//! Headless Runtime: in-process reference runtime without a surface
//!
//! Components are bookkeeping only. The runtime counts live components,
//! digests the snapshot bytes it was given and records every launch, which
//! is what the host and the tests look at.
use crate::components::{ComponentKind, ComponentResource, SharedComponent, SharedComponents};
use crate::runtime::{EngineRuntime, LaunchConfig, RuntimeError, RuntimeInstance, ScriptIsolate};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One `run_with_entrypoint` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub label: String,
    pub entrypoint: String,
    pub initial_route: Option<String>,
    pub arguments: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RuntimeStats {
    live_components: AtomicUsize,
    allocated: AtomicUsize,
    released: AtomicUsize,
    isolates: AtomicUsize,
    launches: Mutex<Vec<LaunchRecord>>,
}

impl RuntimeStats {
    pub fn live_components(&self) -> usize {
        self.live_components.load(Ordering::SeqCst)
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Isolates handed out, roots and forks alike
    pub fn isolates(&self) -> usize {
        self.isolates.load(Ordering::SeqCst)
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Debug)]
struct HeadlessResource {
    kind: ComponentKind,
    digest: Option<String>,
    stats: Arc<RuntimeStats>,
    released: bool,
}

impl ComponentResource for HeadlessResource {
    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.stats.live_components.fetch_sub(1, Ordering::SeqCst);
        self.stats.released.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(kind = %self.kind, "headless component freed");
    }

    fn digest(&self) -> Option<String> {
        self.digest.clone()
    }
}

#[derive(Debug)]
pub struct HeadlessIsolate {
    label: String,
    allow_headless: bool,
    running: bool,
}

impl ScriptIsolate for HeadlessIsolate {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn run(&mut self, launch: &LaunchConfig) -> Result<(), RuntimeError> {
        if !self.allow_headless {
            return Err(RuntimeError::RunFailed {
                label: self.label.clone(),
                reason: "no surface attached and headless execution is not allowed".into(),
            });
        }
        if self.running {
            return Err(RuntimeError::RunFailed {
                label: self.label.clone(),
                reason: "isolate already running".into(),
            });
        }
        self.running = true;
        tracing::debug!(isolate = %self.label, entrypoint = %launch.entrypoint(), "isolate started");
        Ok(())
    }

    fn shutdown(&mut self) {
        self.running = false;
    }
}

#[derive(Debug, Default)]
pub struct HeadlessRuntime {
    stats: Arc<RuntimeStats>,
    snapshot: Vec<u8>,
}

impl HeadlessRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes standing in for the engine snapshot; only their digest is kept
    pub fn with_snapshot(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.snapshot = bytes.into();
        self
    }

    pub fn stats(&self) -> Arc<RuntimeStats> {
        Arc::clone(&self.stats)
    }

    pub fn snapshot_digest(&self) -> String {
        format!("blake3:{}", blake3::hash(&self.snapshot))
    }

    fn component(&self, kind: ComponentKind, label: &str) -> SharedComponent {
        self.stats.live_components.fetch_add(1, Ordering::SeqCst);
        self.stats.allocated.fetch_add(1, Ordering::SeqCst);
        let digest = match kind {
            ComponentKind::SnapshotData => Some(self.snapshot_digest()),
            _ => None,
        };
        SharedComponent::new(
            kind,
            label,
            Box::new(HeadlessResource {
                kind,
                digest,
                stats: Arc::clone(&self.stats),
                released: false,
            }),
        )
    }

    fn isolate(&self, label: &str, allow_headless: bool) -> Box<dyn ScriptIsolate> {
        self.stats.isolates.fetch_add(1, Ordering::SeqCst);
        Box::new(HeadlessIsolate {
            label: label.to_string(),
            allow_headless,
            running: false,
        })
    }
}

impl EngineRuntime for HeadlessRuntime {
    fn create(&self, label: &str, allow_headless: bool) -> Result<RuntimeInstance, RuntimeError> {
        let components = SharedComponents::new(
            self.component(ComponentKind::RenderPipeline, label),
            self.component(ComponentKind::AssetManager, label),
            self.component(ComponentKind::SnapshotData, label),
        );
        tracing::debug!(engine = %label, "headless components allocated");
        Ok(RuntimeInstance {
            components,
            isolate: self.isolate(label, allow_headless),
        })
    }

    fn spawn_isolate(
        &self,
        label: &str,
        allow_headless: bool,
        _shared: &SharedComponents,
    ) -> Result<Box<dyn ScriptIsolate>, RuntimeError> {
        Ok(self.isolate(label, allow_headless))
    }

    fn run_with_entrypoint(
        &self,
        isolate: &mut dyn ScriptIsolate,
        launch: &LaunchConfig,
    ) -> Result<(), RuntimeError> {
        isolate.run(launch)?;
        self.stats
            .launches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LaunchRecord {
                label: isolate.label().to_string(),
                entrypoint: launch.entrypoint().to_string(),
                initial_route: launch.initial_route.clone(),
                arguments: launch.arguments.clone(),
            });
        Ok(())
    }
}
