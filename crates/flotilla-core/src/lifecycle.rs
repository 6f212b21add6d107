//! Lifecycle Coordinator: two-phase init over the module tree
//!
//! Phase A walks the tree depth-first, pre-order. For every module it runs
//! the registration hook, the page builder hook and the sync init hook, all
//! three before the next module starts. Phase B starts only after Phase A
//! finished for the whole tree: every async hook runs as its own task and an
//! [`InitBarrier`] reports completion once all of them answered.
use crate::barrier::InitBarrier;
use crate::config::CoordinatorConfig;
use crate::context::ModuleContext;
use crate::error::{ConfigError, FlotillaError, LifecycleError};
use crate::module::Module;
use crate::registry::{ModuleRegistry, ModuleTree};
use crate::report::{InitPhase, InitReport, InitStage, ModuleFailure};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

pub struct LifecycleCoordinator {
    context: Arc<ModuleContext>,
    registry: ModuleRegistry,
    config: CoordinatorConfig,
    report: InitReport,
    barrier: Option<InitBarrier>,
}

impl LifecycleCoordinator {
    pub fn new(context: Arc<ModuleContext>) -> Self {
        let report = InitReport::new(context.engine(), context.session_id());
        Self {
            context,
            registry: ModuleRegistry::new(),
            config: CoordinatorConfig::default(),
            report,
            barrier: None,
        }
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> &Arc<ModuleContext> {
        &self.context
    }

    pub fn tree(&self) -> &ModuleTree {
        self.registry.tree()
    }

    pub fn report(&self) -> &InitReport {
        &self.report
    }

    pub fn phase(&self) -> InitPhase {
        self.report.phase
    }

    /// Barrier of the running or finished async phase
    pub fn barrier(&self) -> Option<&InitBarrier> {
        self.barrier.as_ref()
    }

    /// Run Phase A, then Phase B unless `preboot` defers it to a later
    /// [`run_phase_b`](Self::run_phase_b).
    pub async fn init(
        &mut self,
        root: Arc<dyn Module>,
        preboot: bool,
    ) -> Result<InitReport, FlotillaError> {
        self.report.preboot = preboot;
        self.run_phase_a(root)?;
        if preboot {
            tracing::info!(engine = %self.context.engine(), "preboot: async init deferred");
            return Ok(self.report.clone());
        }
        self.run_phase_b().await
    }

    /// Registration, page builders and sync init for the whole tree.
    pub fn run_phase_a(&mut self, root: Arc<dyn Module>) -> Result<&InitReport, ConfigError> {
        if !self.context.claim_init() {
            let err = ConfigError::AlreadyInitialized {
                engine: self.context.engine().to_string(),
            };
            tracing::error!(error = %err, "init refused");
            return Err(err);
        }

        tracing::info!(
            engine = %self.context.engine(),
            root = %root.name(),
            "phase A: register + sync init"
        );
        self.report.started_at = Some(Utc::now());
        let start = Instant::now();

        let ctx = Arc::clone(&self.context);
        let mut failures = Vec::new();
        let order = self.registry.walk(root, &ctx, |key, module| {
            tracing::debug!(module = %key, "page builder register");
            module.on_page_builder_register(&ctx);

            tracing::debug!(module = %key, "module init");
            if let Err(err) = module.on_module_init(&ctx) {
                tracing::warn!(module = %key, error = %err, "sync init failed");
                failures.push(ModuleFailure::new(key, InitStage::Sync, &err));
            }
        })?;

        self.report.phase_a_ms = start.elapsed().as_millis() as u64;
        self.report.modules = order;
        self.report.failures.extend(failures);
        self.report.phase = InitPhase::Registered;

        tracing::info!(
            engine = %self.context.engine(),
            modules = self.report.modules.len(),
            routes = self.context.pages().len(),
            latency_ms = self.report.phase_a_ms,
            "phase A complete"
        );
        Ok(&self.report)
    }

    /// Spawn every async hook and return the barrier tracking them.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_phase_b(&mut self) -> Result<InitBarrier, ConfigError> {
        let engine = self.context.engine().to_string();
        match self.report.phase {
            InitPhase::Idle => {
                return Err(ConfigError::PhaseOrder(format!(
                    "async init requested before registration on engine {engine}"
                )))
            }
            InitPhase::AsyncPending | InitPhase::Complete => {
                return Err(ConfigError::AsyncInitAlreadyStarted { engine })
            }
            InitPhase::Registered => {}
        }
        if !self.context.claim_async_init() {
            return Err(ConfigError::AsyncInitAlreadyStarted { engine });
        }

        let modules = self.registry.tree().modules();
        tracing::info!(engine = %engine, modules = modules.len(), "phase B: async init");

        let (barrier, tokens) = InitBarrier::new(modules.iter().map(|(key, _)| key.clone()));
        for ((key, module), token) in modules.into_iter().zip(tokens) {
            let ctx = Arc::clone(&self.context);
            tokio::spawn(async move {
                tracing::debug!(module = %key, "async init start");
                let result = module.on_module_async_init(ctx).await;
                token.complete(result);
            });
        }

        self.report.phase = InitPhase::AsyncPending;
        self.barrier = Some(barrier.clone());
        Ok(barrier)
    }

    /// Wait for the async phase, bounded by the configured timeout if any.
    pub async fn finish_phase_b(&mut self) -> Result<InitReport, FlotillaError> {
        if self.report.phase == InitPhase::Complete {
            return Ok(self.report.clone());
        }
        let barrier = self.barrier.clone().ok_or_else(|| {
            ConfigError::PhaseOrder(format!(
                "async init was never started on engine {}",
                self.context.engine()
            ))
        })?;

        let outcome = match self.config.async_timeout() {
            Some(limit) => match tokio::time::timeout(limit, barrier.wait()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let err = LifecycleError::AsyncInitTimedOut {
                        timeout_ms: limit.as_millis() as u64,
                        pending: barrier.pending(),
                    };
                    tracing::warn!(engine = %self.context.engine(), error = %err, "async init wait gave up");
                    return Err(err.into());
                }
            },
            None => barrier.wait().await,
        };

        self.report.async_completed = outcome.completed;
        self.report.failures.extend(outcome.failures);
        self.report.phase = InitPhase::Complete;
        self.report.finished_at = Some(Utc::now());

        tracing::info!(
            engine = %self.context.engine(),
            failures = self.report.failures.len(),
            "init complete"
        );
        Ok(self.report.clone())
    }

    pub async fn run_phase_b(&mut self) -> Result<InitReport, FlotillaError> {
        self.start_phase_b()?;
        self.finish_phase_b().await
    }
}
