//! Module Context: environment shared by every module of one engine
use flotilla_pages::PageBuilderTable;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

type ServiceMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// One per engine context, handed by reference to every hook.
///
/// Writes are expected from the engine's coordination thread; the interior
/// locks keep concurrent registration sound but do not order it.
pub struct ModuleContext {
    engine: String,
    session_id: String,
    pages: PageBuilderTable,
    services: RwLock<ServiceMap>,
    params: RwLock<HashMap<String, Value>>,
    init_claimed: AtomicBool,
    async_init_claimed: AtomicBool,
}

impl ModuleContext {
    pub fn new(engine: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            session_id: uuid::Uuid::new_v4().to_string(),
            pages: PageBuilderTable::new(),
            services: RwLock::new(HashMap::new()),
            params: RwLock::new(HashMap::new()),
            init_claimed: AtomicBool::new(false),
            async_init_claimed: AtomicBool::new(false),
        }
    }

    /// Label of the engine context owning this module context
    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn pages(&self) -> &PageBuilderTable {
        &self.pages
    }

    /// Publish a service to other modules, replacing any service of the same type.
    pub fn provide<T>(&self, service: Arc<T>) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let previous = self
            .services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(TypeId::of::<T>(), service);
        previous.and_then(|p| p.downcast::<T>().ok())
    }

    pub fn service<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        let service = services.get(&TypeId::of::<T>())?;
        Arc::clone(service).downcast::<T>().ok()
    }

    pub fn set_param(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.params
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), value)
    }

    pub fn get_param(&self, key: &str) -> Option<Value> {
        self.params
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn remove_param(&self, key: &str) -> Option<Value> {
        self.params
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
    }

    /// Whether the lifecycle protocol has been started on this context
    pub fn is_init_claimed(&self) -> bool {
        self.init_claimed.load(Ordering::Acquire)
    }

    /// True only for the first caller.
    pub(crate) fn claim_init(&self) -> bool {
        !self.init_claimed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn claim_async_init(&self) -> bool {
        !self.async_init_claimed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("engine", &self.engine)
            .field("session_id", &self.session_id)
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}
