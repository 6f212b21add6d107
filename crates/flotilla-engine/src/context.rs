//! Engine Context: one engine instance and everything it owns
use crate::components::{ComponentInfo, SharedComponents};
use crate::runtime::{EngineRuntime, LaunchConfig, ScriptIsolate};
use flotilla_core::{
    ConfigError, CoordinatorConfig, FlotillaError, InitPhase, InitReport, LifecycleCoordinator,
    LifecycleError, Module, ModuleContext,
};
use flotilla_pages::{PageSpec, RouteSettings};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Created,
    Initialized,
    Running,
    Destroyed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Created => "created",
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Serializable view of an engine context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSummary {
    pub label: String,
    pub state: EngineState,
    pub allow_headless: bool,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub channel_namespace: String,
    pub launch: Option<LaunchConfig>,
    pub init_phase: InitPhase,
    pub routes: usize,
    pub page_stack: Vec<String>,
    pub components: Vec<ComponentInfo>,
}

pub struct EngineContext {
    label: String,
    allow_headless: bool,
    state: EngineState,
    /// None once destroyed
    components: Option<SharedComponents>,
    isolate: Option<Box<dyn ScriptIsolate>>,
    channel_namespace: String,
    page_stack: Vec<PageSpec>,
    coordinator: LifecycleCoordinator,
    parent: Option<String>,
    children: Vec<String>,
    /// Launch waiting for `run`, set by a fork request
    pending_launch: Option<LaunchConfig>,
    launch: Option<LaunchConfig>,
}

impl EngineContext {
    /// Root engine with fresh components from `runtime`.
    pub fn create(
        runtime: &dyn EngineRuntime,
        label: impl Into<String>,
        allow_headless: bool,
    ) -> Result<Self, FlotillaError> {
        let label = label.into();
        let instance = runtime.create(&label, allow_headless)?;
        tracing::info!(engine = %label, allow_headless, "engine created");
        Ok(Self::assemble(
            label,
            allow_headless,
            instance.components,
            instance.isolate,
            None,
        ))
    }

    /// Fork of `parent`: shared components, everything else fresh.
    pub(crate) fn fork_of(
        runtime: &dyn EngineRuntime,
        label: impl Into<String>,
        parent: &EngineContext,
    ) -> Result<Self, FlotillaError> {
        let label = label.into();
        let components = parent.components.clone().ok_or_else(|| ConfigError::ForkFromDestroyed {
            label: parent.label.clone(),
        })?;
        let isolate = runtime.spawn_isolate(&label, parent.allow_headless, &components)?;
        Ok(Self::assemble(
            label,
            parent.allow_headless,
            components,
            isolate,
            Some(parent.label.clone()),
        ))
    }

    fn assemble(
        label: String,
        allow_headless: bool,
        components: SharedComponents,
        isolate: Box<dyn ScriptIsolate>,
        parent: Option<String>,
    ) -> Self {
        let module_context = Arc::new(ModuleContext::new(label.clone()));
        Self {
            channel_namespace: format!("{label}/channels"),
            coordinator: LifecycleCoordinator::new(module_context),
            label,
            allow_headless,
            state: EngineState::Created,
            components: Some(components),
            isolate: Some(isolate),
            page_stack: Vec::new(),
            parent,
            children: Vec::new(),
            pending_launch: None,
            launch: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn allow_headless(&self) -> bool {
        self.allow_headless
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state != EngineState::Destroyed
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Live forks of this context
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn components(&self) -> Option<&SharedComponents> {
        self.components.as_ref()
    }

    pub fn module_context(&self) -> &Arc<ModuleContext> {
        self.coordinator.context()
    }

    pub fn init_report(&self) -> &InitReport {
        self.coordinator.report()
    }

    /// Launch the context was run with
    pub fn launch(&self) -> Option<&LaunchConfig> {
        self.launch.as_ref()
    }

    pub fn channel_namespace(&self) -> &str {
        &self.channel_namespace
    }

    /// Channel name scoped to this context
    pub fn channel_name(&self, name: &str) -> String {
        format!("{}/{}", self.channel_namespace, name)
    }

    pub fn page_stack(&self) -> &[PageSpec] {
        &self.page_stack
    }

    pub fn set_launch(&mut self, launch: LaunchConfig) {
        self.pending_launch = Some(launch);
    }

    pub(crate) fn pending_launch(&self) -> Option<&LaunchConfig> {
        self.pending_launch.as_ref()
    }

    pub(crate) fn add_child(&mut self, label: impl Into<String>) {
        self.children.push(label.into());
    }

    pub(crate) fn remove_child(&mut self, label: &str) {
        self.children.retain(|c| c != label);
    }

    fn ensure_live(&self) -> Result<(), LifecycleError> {
        if self.state == EngineState::Destroyed {
            return Err(LifecycleError::Destroyed {
                label: self.label.clone(),
            });
        }
        Ok(())
    }

    /// Two-phase init of this context's module tree. Only valid before run.
    pub async fn initialize(
        &mut self,
        root: Arc<dyn Module>,
        preboot: bool,
        config: CoordinatorConfig,
    ) -> Result<InitReport, FlotillaError> {
        self.ensure_live()?;
        if self.state == EngineState::Running {
            return Err(ConfigError::PhaseOrder(format!(
                "engine {} is already running; initialize before run",
                self.label
            ))
            .into());
        }
        if self.coordinator.phase() == InitPhase::Idle {
            let context = Arc::clone(self.coordinator.context());
            self.coordinator = LifecycleCoordinator::new(context).with_config(config);
        }
        let report = self.coordinator.init(root, preboot).await?;
        self.state = EngineState::Initialized;
        Ok(report)
    }

    /// Start the deferred async phase of a preboot init.
    pub async fn complete_async_init(&mut self) -> Result<InitReport, FlotillaError> {
        self.ensure_live()?;
        self.coordinator.run_phase_b().await
    }

    pub fn run(
        &mut self,
        runtime: &dyn EngineRuntime,
        launch: LaunchConfig,
    ) -> Result<(), FlotillaError> {
        self.ensure_live()?;
        if self.state == EngineState::Running {
            return Err(LifecycleError::AlreadyRunning {
                label: self.label.clone(),
            }
            .into());
        }
        let isolate = self
            .isolate
            .as_deref_mut()
            .ok_or_else(|| LifecycleError::Destroyed {
                label: self.label.clone(),
            })?;
        runtime.run_with_entrypoint(isolate, &launch)?;

        self.state = EngineState::Running;
        self.pending_launch = None;
        tracing::info!(
            engine = %self.label,
            entrypoint = %launch.entrypoint(),
            arguments = launch.arguments.len(),
            "engine running"
        );

        if let Some(route) = launch.initial_route.clone() {
            if self.module_context().pages().contains(&route) {
                self.navigate(&route, Value::Null)?;
            } else {
                tracing::debug!(engine = %self.label, route = %route, "initial route not registered here");
            }
        }
        self.launch = Some(launch);
        Ok(())
    }

    /// Build `route` from this context's page table and push it.
    pub fn navigate(&mut self, route: &str, params: Value) -> Result<PageSpec, FlotillaError> {
        if self.state != EngineState::Running {
            return Err(LifecycleError::NotRunning {
                label: self.label.clone(),
                state: self.state.to_string(),
            }
            .into());
        }
        let index = self.page_stack.iter().filter(|p| p.route == route).count() as u32;
        let settings = RouteSettings::new(route).with_index(index).with_params(params);
        let page = self.module_context().pages().build(&settings)?;

        tracing::debug!(engine = %self.label, route = %route, depth = self.page_stack.len() + 1, "navigate");
        self.page_stack.push(page.clone());
        Ok(page)
    }

    pub fn pop(&mut self) -> Option<PageSpec> {
        self.page_stack.pop()
    }

    /// Release the isolate, the page stack and this context's hold on the
    /// shared components.
    pub(crate) fn destroy(&mut self) -> Result<(), LifecycleError> {
        self.ensure_live()?;
        if let Some(mut isolate) = self.isolate.take() {
            isolate.shutdown();
        }
        self.page_stack.clear();
        self.components = None;
        self.pending_launch = None;
        self.state = EngineState::Destroyed;
        tracing::info!(engine = %self.label, "engine destroyed");
        Ok(())
    }

    pub fn summary(&self) -> EngineSummary {
        EngineSummary {
            label: self.label.clone(),
            state: self.state,
            allow_headless: self.allow_headless,
            parent: self.parent.clone(),
            children: self.children.clone(),
            channel_namespace: self.channel_namespace.clone(),
            launch: self.launch.clone(),
            init_phase: self.coordinator.phase(),
            routes: self.module_context().pages().len(),
            page_stack: self.page_stack.iter().map(|p| p.route.clone()).collect(),
            components: self
                .components
                .as_ref()
                .map(SharedComponents::describe)
                .unwrap_or_default(),
        }
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("page_stack", &self.page_stack.len())
            .finish()
    }
}
