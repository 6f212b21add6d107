//! Integration tests for engine forking and shared component lifetime.

use flotilla_core::pages::{PageSpec, RouteSettings};
use flotilla_core::{
    async_trait, ConfigError, FlotillaError, InitPhase, LifecycleError, Module, ModuleContext,
    ModuleError, ModuleRegistrar,
};
use flotilla_engine::{
    EngineGroup, EngineState, ForkRequest, HeadlessRuntime, LaunchConfig, RegistrationPolicy,
    RuntimeStats, RETIRED_CAPACITY,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Registers one route and counts its hook calls
struct Screen {
    name: &'static str,
    route: &'static str,
    fail_init: bool,
    registrations: Arc<AtomicUsize>,
    async_inits: Arc<AtomicUsize>,
}

impl Screen {
    fn new(name: &'static str, route: &'static str) -> Self {
        Self {
            name,
            route,
            fail_init: false,
            registrations: Arc::new(AtomicUsize::new(0)),
            async_inits: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

#[async_trait]
impl Module for Screen {
    fn name(&self) -> &str {
        self.name
    }

    fn on_page_builder_register(&self, ctx: &ModuleContext) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let title = self.name;
        ctx.pages().register(self.route, self.name, move |s: &RouteSettings| {
            Ok(PageSpec::from_settings(s).titled(title))
        });
    }

    fn on_module_init(&self, _ctx: &ModuleContext) -> Result<(), ModuleError> {
        if self.fail_init {
            return Err(ModuleError::failed("backend unreachable"));
        }
        Ok(())
    }

    async fn on_module_async_init(&self, _ctx: Arc<ModuleContext>) -> Result<(), ModuleError> {
        self.async_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct App(Vec<Arc<dyn Module>>);

impl Module for App {
    fn name(&self) -> &str {
        "app"
    }

    fn on_module_register(&self, _ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
        for child in &self.0 {
            registrar.register_module(Arc::clone(child));
        }
    }
}

fn module(m: impl Module + 'static) -> Arc<dyn Module> {
    Arc::new(m)
}

fn headless() -> (EngineGroup, Arc<RuntimeStats>) {
    let runtime = HeadlessRuntime::new().with_snapshot(b"snapshot-v1".to_vec());
    let stats = runtime.stats();
    (EngineGroup::new(Arc::new(runtime)), stats)
}

async fn running_main(group: &mut EngineGroup) {
    group.create("main", true).unwrap();
    group.run("main", None).await.unwrap();
}

// =============================================================================
// Fork isolation
// =============================================================================

#[tokio::test]
async fn test_fork_shares_components_but_not_isolate() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;

    let fork = group.fork("main", ForkRequest::new()).unwrap();
    let main = group.get("main").unwrap();
    let child = group.get(&fork).unwrap();

    assert!(main
        .components()
        .unwrap()
        .same_as(child.components().unwrap()));
    assert_eq!(main.components().unwrap().holders(), 2);
    assert_eq!(stats.live_components(), 3);
    assert_eq!(stats.isolates(), 2);

    assert_ne!(main.channel_namespace(), child.channel_namespace());
    assert_eq!(child.state(), EngineState::Created);
    assert_eq!(child.parent(), Some("main"));
    assert!(!Arc::ptr_eq(main.module_context(), child.module_context()));
}

#[tokio::test]
async fn test_destroying_fork_keeps_parent_components() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;
    let fork = group.fork("main", ForkRequest::new()).unwrap();
    group.run(&fork, None).await.unwrap();

    group.destroy(&fork).unwrap();

    let main = group.get("main").unwrap();
    assert_eq!(main.state(), EngineState::Running);
    assert_eq!(main.components().unwrap().holders(), 1);
    assert!(main.children().is_empty());
    assert_eq!(stats.live_components(), 3);
    assert_eq!(stats.released(), 0);
}

#[tokio::test]
async fn test_destroying_parent_with_live_fork_is_refused() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;
    let fork = group.fork("main", ForkRequest::new()).unwrap();

    let err = group.destroy("main").unwrap_err();
    match err {
        FlotillaError::Lifecycle(LifecycleError::LiveForks { label, children }) => {
            assert_eq!(label, "main");
            assert_eq!(children, vec![fork.clone()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(group.get("main").unwrap().state(), EngineState::Running);
    assert_eq!(stats.live_components(), 3);
}

#[tokio::test]
async fn test_components_released_after_last_holder() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;
    let fork = group.fork("main", ForkRequest::new()).unwrap();

    group.destroy(&fork).unwrap();
    assert_eq!(stats.live_components(), 3);

    group.destroy("main").unwrap();
    assert_eq!(stats.live_components(), 0);
    assert_eq!(stats.released(), 3);
    assert!(group.live_labels().is_empty());
}

#[tokio::test]
async fn test_destroy_tree_goes_children_first() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;
    let a = group.fork("main", ForkRequest::new().labeled("a")).unwrap();
    group.run(&a, None).await.unwrap();
    group.fork(&a, ForkRequest::new().labeled("a.x")).unwrap();
    group.fork("main", ForkRequest::new().labeled("b")).unwrap();

    let destroyed = group.destroy_tree("main").unwrap();
    assert_eq!(destroyed, vec!["a.x", "a", "b", "main"]);
    assert_eq!(stats.live_components(), 0);
}

#[tokio::test]
async fn test_fork_from_destroyed_engine() {
    let (mut group, _) = headless();
    running_main(&mut group).await;
    let fork = group.fork("main", ForkRequest::new()).unwrap();
    group.run(&fork, None).await.unwrap();
    group.destroy(&fork).unwrap();

    let err = group.fork(&fork, ForkRequest::new()).unwrap_err();
    assert!(matches!(
        err,
        FlotillaError::Config(ConfigError::ForkFromDestroyed { .. })
    ));

    let err = group.destroy(&fork).unwrap_err();
    assert!(matches!(
        err,
        FlotillaError::Lifecycle(LifecycleError::Destroyed { .. })
    ));
}

#[tokio::test]
async fn test_fork_label_reusable_after_destroy() {
    let (mut group, _) = headless();
    running_main(&mut group).await;
    group.fork("main", ForkRequest::new().labeled("chat")).unwrap();

    let err = group
        .fork("main", ForkRequest::new().labeled("chat"))
        .unwrap_err();
    assert!(matches!(
        err,
        FlotillaError::Config(ConfigError::DuplicateEngineLabel { .. })
    ));

    group.destroy("chat").unwrap();
    group.fork("main", ForkRequest::new().labeled("chat")).unwrap();
    assert_eq!(group.live_labels(), vec!["chat", "main"]);
}

#[tokio::test]
async fn test_fork_destroy_cycles_keep_group_bounded() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;

    for _ in 0..1000 {
        let fork = group.fork("main", ForkRequest::new()).unwrap();
        group.run(&fork, None).await.unwrap();
        group.destroy(&fork).unwrap();
    }

    assert_eq!(group.len(), 1);
    assert_eq!(group.live_labels(), vec!["main"]);
    assert_eq!(group.retired_len(), RETIRED_CAPACITY);
    assert_eq!(group.summaries().len(), RETIRED_CAPACITY + 1);
    assert!(group.get("main").unwrap().children().is_empty());
    assert_eq!(stats.live_components(), 3);

    // the oldest destroys are forgotten, the latest still answers
    assert!(group.snapshot("main.1").is_none());
    let last = group.snapshot("main.1000").unwrap();
    assert_eq!(last.state, EngineState::Destroyed);
    assert!(last.components.is_empty());
}

// =============================================================================
// Launch and navigation
// =============================================================================

#[tokio::test]
async fn test_fork_launch_is_recorded_by_runtime() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;
    let fork = group
        .fork(
            "main",
            ForkRequest::new()
                .with_entrypoint("secondary")
                .with_initial_route("/chat")
                .with_arguments(["room=7"]),
        )
        .unwrap();
    group.run(&fork, None).await.unwrap();

    let launches = stats.launches();
    assert_eq!(launches.len(), 2);
    assert_eq!(launches[0].entrypoint, "main");
    assert_eq!(launches[1].label, fork);
    assert_eq!(launches[1].entrypoint, "secondary");
    assert_eq!(launches[1].arguments, vec!["room=7"]);

    // fork skipped registration: initial route is unknown there
    assert!(group.get(&fork).unwrap().page_stack().is_empty());
}

#[tokio::test]
async fn test_navigation_before_run_is_not_running() {
    let (mut group, _) = headless();
    running_main(&mut group).await;
    let fork = group.fork("main", ForkRequest::new()).unwrap();

    let err = group.navigate(&fork, "/home", Value::Null).unwrap_err();
    assert!(matches!(
        err,
        FlotillaError::Lifecycle(LifecycleError::NotRunning { .. })
    ));
}

#[tokio::test]
async fn test_explicit_launch_overrides_fork_request() {
    let (mut group, stats) = headless();
    running_main(&mut group).await;
    let fork = group
        .fork("main", ForkRequest::new().with_entrypoint("secondary"))
        .unwrap();
    group
        .run(&fork, Some(LaunchConfig::new().with_entrypoint("debug")))
        .await
        .unwrap();

    assert_eq!(stats.launches()[1].entrypoint, "debug");
    assert_eq!(
        group.get(&fork).unwrap().launch().unwrap().entrypoint(),
        "debug"
    );
}

// =============================================================================
// Re-registration on forks
// =============================================================================

#[tokio::test]
async fn test_skip_policy_leaves_fork_page_table_empty() {
    let (mut group, _) = headless();
    let screen = Screen::new("home", "/home");
    let registrations = Arc::clone(&screen.registrations);
    let home = module(screen);

    group.create("main", true).unwrap();
    group
        .init_multi_engine("main", module(App(vec![home])))
        .await
        .unwrap();
    group.run("main", None).await.unwrap();

    let fork = group.fork("main", ForkRequest::new()).unwrap();
    group.run(&fork, None).await.unwrap();

    assert_eq!(registrations.load(Ordering::SeqCst), 1);
    assert!(group.get(&fork).unwrap().module_context().pages().is_empty());
    assert_eq!(group.get("main").unwrap().module_context().pages().len(), 1);
}

#[tokio::test]
async fn test_phase_a_policy_registers_against_fork_context() {
    let (mut group, _) = headless();
    let screen = Screen::new("home", "/home");
    let registrations = Arc::clone(&screen.registrations);
    let async_inits = Arc::clone(&screen.async_inits);
    let home = module(screen);

    group.create("main", true).unwrap();
    group
        .init_multi_engine("main", module(App(vec![home])))
        .await
        .unwrap();
    group.run("main", None).await.unwrap();

    let fork = group
        .fork(
            "main",
            ForkRequest::new()
                .with_registration(RegistrationPolicy::PhaseA)
                .with_initial_route("/home"),
        )
        .unwrap();
    group.run(&fork, None).await.unwrap();

    let child = group.get(&fork).unwrap();
    assert_eq!(registrations.load(Ordering::SeqCst), 2);
    assert_eq!(async_inits.load(Ordering::SeqCst), 1);
    assert_eq!(child.init_report().phase, InitPhase::Registered);
    assert_eq!(child.page_stack()[0].title.as_deref(), Some("home"));
}

#[tokio::test]
async fn test_full_policy_runs_async_phase_too() {
    let (mut group, _) = headless();
    let screen = Screen::new("home", "/home");
    let async_inits = Arc::clone(&screen.async_inits);
    let home = module(screen);

    group.create("main", true).unwrap();
    group
        .init_multi_engine("main", module(App(vec![home])))
        .await
        .unwrap();
    group.run("main", None).await.unwrap();

    let fork = group
        .fork(
            "main",
            ForkRequest::new().with_registration(RegistrationPolicy::Full),
        )
        .unwrap();
    group.run(&fork, None).await.unwrap();

    assert_eq!(async_inits.load(Ordering::SeqCst), 2);
    assert!(group.get(&fork).unwrap().init_report().is_clean());
}

// =============================================================================
// Degrade on failure
// =============================================================================

#[tokio::test]
async fn test_failed_module_routes_can_be_disabled() {
    let (mut group, _) = headless();
    let root = module(App(vec![
        module(Screen::new("home", "/home")),
        module(Screen::new("feed", "/feed").failing()),
    ]));

    group.create("main", true).unwrap();
    let report = group.init("main", root, false).await.unwrap();
    assert_eq!(report.failed_modules(), vec!["feed"]);

    let removed = group.disable_failed_routes("main").unwrap();
    assert_eq!(removed, vec!["/feed"]);

    let pages = group.get("main").unwrap().module_context().pages();
    assert_eq!(pages.routes(), vec!["/home"]);
}

#[tokio::test]
async fn test_snapshot_serializes_engine_summary() {
    let (mut group, _) = headless();
    running_main(&mut group).await;
    let fork = group.fork("main", ForkRequest::new()).unwrap();

    let summary = group.snapshot("main").unwrap();
    assert_eq!(summary.children, vec![fork]);

    let value = serde_json::to_value(&summary).unwrap();
    assert_eq!(value["state"], "running");
    assert_eq!(value["components"][0]["kind"], "render_pipeline");
    assert_eq!(value["components"][0]["holders"], 2);
    assert!(value["components"][2]["digest"]
        .as_str()
        .unwrap()
        .starts_with("blake3:"));
}
