//! Engine Group: creates, forks, runs and destroys engine contexts
//!
//! Forks share their parent's components and get everything else fresh.
//! The parent/child links form a tree; a context cannot be destroyed while
//! it still has live forks. A destroyed context is dropped; only its summary
//! is kept, for the last [`RETIRED_CAPACITY`] destroys.
use crate::context::{EngineContext, EngineState, EngineSummary};
use crate::runtime::{EngineRuntime, LaunchConfig};
use flotilla_core::{
    ConfigError, CoordinatorConfig, FlotillaError, InitReport, LifecycleError, Module,
};
use flotilla_pages::PageSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// What a fork re-runs of the module lifecycle when it is run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Start with an empty page table
    #[default]
    Skip,
    /// Registration, page builders and sync init
    PhaseA,
    /// Phase A, then async init
    Full,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_route: Option<String>,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub registration: RegistrationPolicy,
}

impl ForkRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
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

    pub fn with_registration(mut self, registration: RegistrationPolicy) -> Self {
        self.registration = registration;
        self
    }

    fn launch(&self) -> LaunchConfig {
        LaunchConfig {
            entrypoint: self.entrypoint.clone(),
            initial_route: self.initial_route.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// Summaries of destroyed contexts kept for lookups
pub const RETIRED_CAPACITY: usize = 64;

pub struct EngineGroup {
    runtime: Arc<dyn EngineRuntime>,
    engines: HashMap<String, EngineContext>,
    /// Most recently destroyed last
    retired: VecDeque<EngineSummary>,
    /// Fork policies not yet applied, keyed by label
    policies: HashMap<String, RegistrationPolicy>,
    root_module: Option<Arc<dyn Module>>,
    config: CoordinatorConfig,
    forks_created: usize,
}

impl EngineGroup {
    pub fn new(runtime: Arc<dyn EngineRuntime>) -> Self {
        Self {
            runtime,
            engines: HashMap::new(),
            retired: VecDeque::new(),
            policies: HashMap::new(),
            root_module: None,
            config: CoordinatorConfig::default(),
            forks_created: 0,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn runtime(&self) -> &Arc<dyn EngineRuntime> {
        &self.runtime
    }

    pub fn get(&self, label: &str) -> Option<&EngineContext> {
        self.engines.get(label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut EngineContext> {
        self.engines.get_mut(label)
    }

    fn context(&self, label: &str) -> Result<&EngineContext, ConfigError> {
        self.engines.get(label).ok_or_else(|| ConfigError::UnknownEngine {
            label: label.to_string(),
        })
    }

    fn retired_summary(&self, label: &str) -> Option<&EngineSummary> {
        self.retired.iter().rev().find(|s| s.label == label)
    }

    fn forget_retired(&mut self, label: &str) {
        self.retired.retain(|s| s.label != label);
    }

    /// Number of contexts held, all of them live
    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    fn context_mut(&mut self, label: &str) -> Result<&mut EngineContext, ConfigError> {
        self.engines
            .get_mut(label)
            .ok_or_else(|| ConfigError::UnknownEngine {
                label: label.to_string(),
            })
    }

    fn is_live(&self, label: &str) -> bool {
        self.engines.get(label).is_some_and(EngineContext::is_live)
    }

    /// New root engine. The label of a destroyed context may be reused.
    pub fn create(
        &mut self,
        label: impl Into<String>,
        allow_headless: bool,
    ) -> Result<&mut EngineContext, FlotillaError> {
        let label = label.into();
        if self.is_live(&label) {
            return Err(ConfigError::DuplicateEngineLabel { label }.into());
        }
        let context = EngineContext::create(self.runtime.as_ref(), label.clone(), allow_headless)?;
        self.forget_retired(&label);
        self.engines.insert(label.clone(), context);
        self.context_mut(&label).map_err(Into::into)
    }

    /// Two-phase init of `label`'s module tree.
    pub async fn init(
        &mut self,
        label: &str,
        root: Arc<dyn Module>,
        preboot: bool,
    ) -> Result<InitReport, FlotillaError> {
        let config = self.config.clone();
        let context = self.context_mut(label)?;
        context.initialize(root, preboot, config).await
    }

    /// Same as [`init`](Self::init), preboot taken from the group's
    /// config, and keeps `root` so forks can re-run registration against
    /// their own contexts.
    pub async fn init_multi_engine(
        &mut self,
        label: &str,
        root: Arc<dyn Module>,
    ) -> Result<InitReport, FlotillaError> {
        let preboot = self.config.preboot;
        let report = self.init(label, Arc::clone(&root), preboot).await?;
        self.root_module = Some(root);
        tracing::info!(engine = %label, "multi-engine init: root module recorded");
        Ok(report)
    }

    /// Run the deferred async phase of a preboot init.
    pub async fn complete_async_init(&mut self, label: &str) -> Result<InitReport, FlotillaError> {
        self.context_mut(label)?.complete_async_init().await
    }

    /// Fork a running engine. The fork is returned `Created`; its launch and
    /// registration policy apply on [`run`](Self::run).
    pub fn fork(&mut self, parent: &str, request: ForkRequest) -> Result<String, FlotillaError> {
        if !self.engines.contains_key(parent) && self.retired_summary(parent).is_some() {
            return Err(ConfigError::ForkFromDestroyed {
                label: parent.to_string(),
            }
            .into());
        }
        let parent_ctx = self.context(parent)?;
        match parent_ctx.state() {
            EngineState::Running => {}
            EngineState::Destroyed => {
                return Err(ConfigError::ForkFromDestroyed {
                    label: parent.to_string(),
                }
                .into())
            }
            state => {
                return Err(LifecycleError::NotRunning {
                    label: parent.to_string(),
                    state: state.to_string(),
                }
                .into())
            }
        }
        if request.registration != RegistrationPolicy::Skip && self.root_module.is_none() {
            return Err(ConfigError::MissingRootModule.into());
        }

        let label = match &request.label {
            Some(label) if self.is_live(label) => {
                return Err(ConfigError::DuplicateEngineLabel {
                    label: label.clone(),
                }
                .into())
            }
            Some(label) => label.clone(),
            None => self.next_fork_label(parent),
        };

        let mut child = EngineContext::fork_of(self.runtime.as_ref(), label.clone(), parent_ctx)?;
        child.set_launch(request.launch());
        self.forks_created += 1;
        self.forget_retired(&label);

        tracing::info!(
            parent = %parent,
            engine = %label,
            registration = ?request.registration,
            "engine forked"
        );
        self.engines.insert(label.clone(), child);
        self.policies.insert(label.clone(), request.registration);
        self.context_mut(parent)?.add_child(label.clone());
        Ok(label)
    }

    fn next_fork_label(&self, parent: &str) -> String {
        let mut n = self.forks_created + 1;
        loop {
            let label = format!("{parent}.{n}");
            if !self.is_live(&label) {
                return label;
            }
            n += 1;
        }
    }

    /// Apply a pending fork policy, then start the engine. `launch` wins over
    /// the launch stored by the fork request.
    pub async fn run(
        &mut self,
        label: &str,
        launch: Option<LaunchConfig>,
    ) -> Result<(), FlotillaError> {
        let policy = self.policies.get(label).copied().unwrap_or_default();
        let root = match policy {
            RegistrationPolicy::Skip => None,
            RegistrationPolicy::PhaseA | RegistrationPolicy::Full => Some(
                self.root_module
                    .clone()
                    .ok_or(ConfigError::MissingRootModule)?,
            ),
        };
        let runtime = Arc::clone(&self.runtime);
        let config = self.config.clone();
        let context = self.context_mut(label)?;

        if let Some(root) = root {
            if context.state() == EngineState::Created {
                let preboot = policy == RegistrationPolicy::PhaseA;
                tracing::debug!(engine = %label, policy = ?policy, "re-running registration on fork");
                context.initialize(root, preboot, config).await?;
            }
        }

        let launch = launch
            .or_else(|| context.pending_launch().cloned())
            .unwrap_or_default();
        context.run(runtime.as_ref(), launch)?;
        self.policies.remove(label);
        Ok(())
    }

    pub fn navigate(
        &mut self,
        label: &str,
        route: &str,
        params: Value,
    ) -> Result<PageSpec, FlotillaError> {
        self.context_mut(label)?.navigate(route, params)
    }

    /// Destroy one context and drop it from the group. Refused while it has
    /// live forks.
    pub fn destroy(&mut self, label: &str) -> Result<(), FlotillaError> {
        if !self.engines.contains_key(label) && self.retired_summary(label).is_some() {
            return Err(LifecycleError::Destroyed {
                label: label.to_string(),
            }
            .into());
        }
        let context = self.context(label)?;
        if !context.is_live() {
            return Err(LifecycleError::Destroyed {
                label: label.to_string(),
            }
            .into());
        }
        if !context.children().is_empty() {
            let err = LifecycleError::LiveForks {
                label: label.to_string(),
                children: context.children().to_vec(),
            };
            tracing::warn!(error = %err, "destroy refused");
            return Err(err.into());
        }

        let parent = context.parent().map(str::to_string);
        let mut context = self
            .engines
            .remove(label)
            .ok_or_else(|| ConfigError::UnknownEngine {
                label: label.to_string(),
            })?;
        context.destroy()?;
        self.retire(context.summary());
        self.policies.remove(label);
        if let Some(parent) = parent {
            if let Some(parent_ctx) = self.engines.get_mut(&parent) {
                parent_ctx.remove_child(label);
            }
        }
        Ok(())
    }

    fn retire(&mut self, summary: EngineSummary) {
        self.forget_retired(&summary.label);
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(summary);
    }

    /// Destroy `label` and all its descendants, children first. Returns
    /// the destroyed labels in order.
    pub fn destroy_tree(&mut self, label: &str) -> Result<Vec<String>, FlotillaError> {
        let children = self.context(label)?.children().to_vec();
        let mut destroyed = Vec::new();
        for child in children {
            destroyed.extend(self.destroy_tree(&child)?);
        }
        self.destroy(label)?;
        destroyed.push(label.to_string());
        Ok(destroyed)
    }

    /// Remove the routes of every module that failed to initialize on
    /// `label`. Returns the removed routes.
    pub fn disable_failed_routes(&self, label: &str) -> Result<Vec<String>, FlotillaError> {
        let context = self.context(label)?;
        let pages = context.module_context().pages();
        let mut removed = Vec::new();
        for module in context.init_report().failed_modules() {
            let routes = pages.remove_owned_by(module);
            if !routes.is_empty() {
                tracing::warn!(engine = %label, module = %module, routes = ?routes, "routes disabled");
            }
            removed.extend(routes);
        }
        Ok(removed)
    }

    /// Labels of live contexts, sorted
    pub fn live_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self
            .engines
            .values()
            .filter(|c| c.is_live())
            .map(|c| c.label().to_string())
            .collect();
        labels.sort();
        labels
    }

    /// Live context first, then a recently destroyed one.
    pub fn snapshot(&self, label: &str) -> Option<EngineSummary> {
        self.engines
            .get(label)
            .map(EngineContext::summary)
            .or_else(|| self.retired_summary(label).cloned())
    }

    /// Summaries of live and recently destroyed contexts, sorted by label
    pub fn summaries(&self) -> Vec<EngineSummary> {
        let mut out: Vec<EngineSummary> = self
            .engines
            .values()
            .map(EngineContext::summary)
            .chain(self.retired.iter().cloned())
            .collect();
        out.sort_by(|a, b| a.label.cmp(&b.label));
        out
    }
}
