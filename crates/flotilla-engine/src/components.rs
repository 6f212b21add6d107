//! Shared Components: render pipeline, asset manager and snapshot data
//!
//! A root engine gets fresh components from the runtime; every fork holds
//! `Arc` clones of its parent's. The runtime resource behind a component is
//! released exactly once, when the last holder lets go.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    RenderPipeline,
    AssetManager,
    SnapshotData,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComponentKind::RenderPipeline => "render_pipeline",
            ComponentKind::AssetManager => "asset_manager",
            ComponentKind::SnapshotData => "snapshot_data",
        };
        f.write_str(name)
    }
}

/// Runtime-side payload of a shared component
pub trait ComponentResource: Send + Sync + fmt::Debug {
    /// Tear the resource down. Runs once, when the last holder drops.
    fn release(&mut self);

    /// Content digest, for resources that have one
    fn digest(&self) -> Option<String> {
        None
    }
}

#[derive(Debug)]
pub struct SharedComponent {
    kind: ComponentKind,
    /// Label of the engine that allocated it
    origin: String,
    resource: Box<dyn ComponentResource>,
}

impl SharedComponent {
    pub fn new(
        kind: ComponentKind,
        origin: impl Into<String>,
        resource: Box<dyn ComponentResource>,
    ) -> Self {
        Self {
            kind,
            origin: origin.into(),
            resource,
        }
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn digest(&self) -> Option<String> {
        self.resource.digest()
    }
}

impl Drop for SharedComponent {
    fn drop(&mut self) {
        tracing::debug!(kind = %self.kind, origin = %self.origin, "shared component released");
        self.resource.release();
    }
}

/// Serializable view of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub kind: ComponentKind,
    pub origin: String,
    /// Engines currently holding it
    pub holders: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// The three components every engine context holds
#[derive(Debug, Clone)]
pub struct SharedComponents {
    render_pipeline: Arc<SharedComponent>,
    assets: Arc<SharedComponent>,
    snapshot: Arc<SharedComponent>,
}

impl SharedComponents {
    pub fn new(
        render_pipeline: SharedComponent,
        assets: SharedComponent,
        snapshot: SharedComponent,
    ) -> Self {
        Self {
            render_pipeline: Arc::new(render_pipeline),
            assets: Arc::new(assets),
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn render_pipeline(&self) -> &Arc<SharedComponent> {
        &self.render_pipeline
    }

    pub fn assets(&self) -> &Arc<SharedComponent> {
        &self.assets
    }

    pub fn snapshot(&self) -> &Arc<SharedComponent> {
        &self.snapshot
    }

    /// Holders of the set, this one included
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.render_pipeline)
    }

    /// True when both point at the very same components
    pub fn same_as(&self, other: &SharedComponents) -> bool {
        Arc::ptr_eq(&self.render_pipeline, &other.render_pipeline)
            && Arc::ptr_eq(&self.assets, &other.assets)
            && Arc::ptr_eq(&self.snapshot, &other.snapshot)
    }

    pub fn describe(&self) -> Vec<ComponentInfo> {
        [&self.render_pipeline, &self.assets, &self.snapshot]
            .into_iter()
            .map(|component| ComponentInfo {
                kind: component.kind(),
                origin: component.origin().to_string(),
                holders: Arc::strong_count(component),
                digest: component.digest(),
            })
            .collect()
    }
}
