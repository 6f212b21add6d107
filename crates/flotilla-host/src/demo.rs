//! Module tree the host boots: a shell with a few feature modules
//!
//! `session` is declared by both the shell and `chat`; it ends up once in
//! the tree.
use flotilla_core::pages::{PageSpec, RouteOptions, RouteSettings};
use flotilla_core::{async_trait, Module, ModuleContext, ModuleError, ModuleRegistrar};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-engine session counter, provided by the session module
#[derive(Debug, Default)]
pub struct SessionStore {
    opened: AtomicU64,
}

impl SessionStore {
    pub fn open(&self) -> u64 {
        self.opened.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct ShellModule;

impl Module for ShellModule {
    fn name(&self) -> &str {
        "shell"
    }

    fn on_module_register(&self, _ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
        registrar.register(SessionModule);
        registrar.register(HomeModule);
        registrar.register(SettingsModule);
        registrar.register(ChatModule);
    }
}

struct SessionModule;

impl Module for SessionModule {
    fn name(&self) -> &str {
        "session"
    }

    fn on_module_init(&self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        ctx.provide(Arc::new(SessionStore::default()));
        Ok(())
    }
}

struct HomeModule;

impl Module for HomeModule {
    fn name(&self) -> &str {
        "home"
    }

    fn on_page_builder_register(&self, ctx: &ModuleContext) {
        ctx.pages().register_with_options(
            "/home",
            self.name(),
            RouteOptions::default().maintain_state().described("landing page"),
            |s: &RouteSettings| Ok(PageSpec::from_settings(s).titled("Home")),
        );
    }
}

struct SettingsModule;

impl Module for SettingsModule {
    fn name(&self) -> &str {
        "settings"
    }

    fn on_page_builder_register(&self, ctx: &ModuleContext) {
        ctx.pages().register("/settings", self.name(), |s: &RouteSettings| {
            Ok(PageSpec::from_settings(s).titled("Settings"))
        });
        ctx.pages().register("/settings/about", self.name(), |s: &RouteSettings| {
            Ok(PageSpec::from_settings(s).titled("About"))
        });
    }
}

struct ChatModule;

#[async_trait]
impl Module for ChatModule {
    fn name(&self) -> &str {
        "chat"
    }

    fn on_module_register(&self, _ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
        registrar.register(SessionModule);
    }

    fn on_page_builder_register(&self, ctx: &ModuleContext) {
        ctx.pages().register("/chat", self.name(), |s: &RouteSettings| {
            Ok(PageSpec::from_settings(s).titled("Chat"))
        });
    }

    fn on_module_init(&self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        if ctx.service::<SessionStore>().is_none() {
            return Err(ModuleError::failed("session store missing"));
        }
        Ok(())
    }

    async fn on_module_async_init(&self, ctx: Arc<ModuleContext>) -> Result<(), ModuleError> {
        let session = ctx
            .service::<SessionStore>()
            .ok_or_else(|| ModuleError::failed("session store missing"))?;
        tokio::task::yield_now().await;
        ctx.set_param("chat.session", json!(session.open()));
        Ok(())
    }
}

/// Root of the host's module tree
pub fn app_root() -> Arc<dyn Module> {
    Arc::new(ShellModule)
}
