//! Module trait: the contract every feature module implements
use crate::context::ModuleContext;
use crate::error::ModuleError;
use crate::registry::ModuleRegistrar;
use async_trait::async_trait;
use std::sync::Arc;

/// A feature module contributing registration and init logic.
///
/// Identity is the [`name`](Module::name): two objects with the same name are
/// the same module and are initialized once. Every hook except `name` has a
/// no-op default, so modules only override what they need.
///
/// Hook order for one engine context:
///
/// 1. [`on_module_register`](Module::on_module_register), declaring children
/// 2. [`on_page_builder_register`](Module::on_page_builder_register)
/// 3. [`on_module_init`](Module::on_module_init)
///
/// run for each module depth-first before moving on, then
/// [`on_module_async_init`](Module::on_module_async_init) runs for every
/// module once the whole tree has passed step 3.
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique module name (ex: "feature.profile")
    fn name(&self) -> &str;

    /// Declare child modules through `registrar`.
    fn on_module_register(&self, ctx: &ModuleContext, registrar: &mut ModuleRegistrar) {
        let _ = (ctx, registrar);
    }

    /// Register routes in `ctx.pages()`.
    fn on_page_builder_register(&self, ctx: &ModuleContext) {
        let _ = ctx;
    }

    fn on_module_init(&self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        let _ = ctx;
        Ok(())
    }

    /// Warm-up work that may suspend (network, disk). Runs as its own task.
    async fn on_module_async_init(&self, ctx: Arc<ModuleContext>) -> Result<(), ModuleError> {
        let _ = ctx;
        Ok(())
    }
}

/// Address of a module object, used to tell instances apart when two objects
/// share a name.
pub(crate) fn instance_id(module: &Arc<dyn Module>) -> usize {
    Arc::as_ptr(module) as *const () as usize
}
