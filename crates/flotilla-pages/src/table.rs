//! Page Builder Table
//!
//! Maps route ids to page builders. Modules register independently and rely
//! on override semantics to compose: the last registration of a route wins.
use crate::settings::{PageSpec, RouteSettings};
use crate::PageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Screen construction capability registered for a route
pub type PageBuilder =
    Arc<dyn Fn(&RouteSettings) -> Result<PageSpec, PageError> + Send + Sync>;

/// Optional per-route settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOptions {
    /// Keep the page alive when it is covered by another page
    #[serde(default)]
    pub maintain_state: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RouteOptions {
    pub fn maintain_state(mut self) -> Self {
        self.maintain_state = true;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Clone)]
pub struct PageBuilderEntry {
    pub builder: PageBuilder,
    /// Key of the module that registered the route
    pub owner: String,
    pub options: RouteOptions,
}

impl fmt::Debug for PageBuilderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuilderEntry")
            .field("owner", &self.owner)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Serializable view of one table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub route: String,
    pub owner: String,
    pub options: RouteOptions,
}

#[derive(Default)]
pub struct PageBuilderTable {
    entries: RwLock<HashMap<String, PageBuilderEntry>>,
}

impl PageBuilderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder for `route`, returning the previous owner if the
    /// route was already registered.
    pub fn register<F>(
        &self,
        route: impl Into<String>,
        owner: impl Into<String>,
        builder: F,
    ) -> Option<String>
    where
        F: Fn(&RouteSettings) -> Result<PageSpec, PageError> + Send + Sync + 'static,
    {
        self.register_with_options(route, owner, RouteOptions::default(), builder)
    }

    pub fn register_with_options<F>(
        &self,
        route: impl Into<String>,
        owner: impl Into<String>,
        options: RouteOptions,
        builder: F,
    ) -> Option<String>
    where
        F: Fn(&RouteSettings) -> Result<PageSpec, PageError> + Send + Sync + 'static,
    {
        let route = route.into();
        let owner = owner.into();
        let entry = PageBuilderEntry {
            builder: Arc::new(builder),
            owner: owner.clone(),
            options,
        };

        let previous = self.write().insert(route.clone(), entry);
        let previous_owner = previous.map(|p| p.owner);
        if let Some(prev) = &previous_owner {
            tracing::debug!(route = %route, previous = %prev, owner = %owner, "page builder overridden");
        } else {
            tracing::debug!(route = %route, owner = %owner, "page builder registered");
        }
        previous_owner
    }

    pub fn get(&self, route: &str) -> Option<PageBuilderEntry> {
        self.read().get(route).cloned()
    }

    pub fn contains(&self, route: &str) -> bool {
        self.read().contains_key(route)
    }

    pub fn owner_of(&self, route: &str) -> Option<String> {
        self.read().get(route).map(|e| e.owner.clone())
    }

    /// Resolve `settings.url` and run its builder.
    ///
    /// The builder runs outside the table lock, so it may itself consult the
    /// table.
    pub fn build(&self, settings: &RouteSettings) -> Result<PageSpec, PageError> {
        let builder = self
            .read()
            .get(&settings.url)
            .map(|e| Arc::clone(&e.builder))
            .ok_or_else(|| PageError::UnknownRoute(settings.url.clone()))?;
        builder(settings)
    }

    pub fn remove(&self, route: &str) -> Option<PageBuilderEntry> {
        self.write().remove(route)
    }

    /// Drop every route registered by `owner`. Returns the removed routes, sorted.
    pub fn remove_owned_by(&self, owner: &str) -> Vec<String> {
        let mut entries = self.write();
        let mut removed: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(route, _)| route.clone())
            .collect();
        for route in &removed {
            entries.remove(route);
        }
        removed.sort();
        removed
    }

    /// Registered routes, sorted
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.read().keys().cloned().collect();
        routes.sort();
        routes
    }

    pub fn describe(&self) -> Vec<RouteInfo> {
        let mut infos: Vec<RouteInfo> = self
            .read()
            .iter()
            .map(|(route, e)| RouteInfo {
                route: route.clone(),
                owner: e.owner.clone(),
                options: e.options.clone(),
            })
            .collect();
        infos.sort_by(|a, b| a.route.cmp(&b.route));
        infos
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, PageBuilderEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, PageBuilderEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for PageBuilderTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBuilderTable")
            .field("routes", &self.routes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn titled(
        title: &'static str,
    ) -> impl Fn(&RouteSettings) -> Result<PageSpec, PageError> + Send + Sync + 'static {
        move |s: &RouteSettings| Ok(PageSpec::from_settings(s).titled(title))
    }

    #[test]
    fn test_last_registration_wins() {
        let table = PageBuilderTable::new();
        assert_eq!(table.register("/home", "a", titled("from a")), None);
        assert_eq!(table.register("/home", "b", titled("from b")), Some("a".to_string()));

        let page = table.build(&RouteSettings::new("/home")).unwrap();
        assert_eq!(page.title.as_deref(), Some("from b"));
        assert_eq!(table.owner_of("/home").as_deref(), Some("b"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_unknown_route() {
        let table = PageBuilderTable::new();
        let err = table.build(&RouteSettings::new("/missing")).unwrap_err();
        assert_eq!(err, PageError::UnknownRoute("/missing".to_string()));
        assert!(err.to_string().starts_with("PAGE/"));
    }

    #[test]
    fn test_builder_failure_propagates() {
        let table = PageBuilderTable::new();
        table.register("/broken", "m", |s: &RouteSettings| {
            Err(PageError::BuildFailed {
                route: s.url.clone(),
                reason: "no data".to_string(),
            })
        });

        let err = table.build(&RouteSettings::new("/broken")).unwrap_err();
        assert!(matches!(err, PageError::BuildFailed { .. }));
    }

    #[test]
    fn test_builder_may_consult_table() {
        let table = Arc::new(PageBuilderTable::new());
        table.register("/inner", "m", titled("inner"));

        let handle = Arc::clone(&table);
        table.register("/outer", "m", move |_s: &RouteSettings| {
            handle.build(&RouteSettings::new("/inner"))
        });

        let page = table.build(&RouteSettings::new("/outer")).unwrap();
        assert_eq!(page.route, "/inner");
    }

    #[test]
    fn test_remove_owned_by() {
        let table = PageBuilderTable::new();
        table.register("/a", "one", titled("a"));
        table.register("/b", "two", titled("b"));
        table.register("/c", "one", titled("c"));

        let removed = table.remove_owned_by("one");
        assert_eq!(removed, vec!["/a".to_string(), "/c".to_string()]);
        assert_eq!(table.routes(), vec!["/b".to_string()]);
    }

    #[test]
    fn test_describe_includes_options() {
        let table = PageBuilderTable::new();
        table.register_with_options(
            "/feed",
            "feed",
            RouteOptions::default().maintain_state().described("news feed"),
            titled("feed"),
        );

        let infos = table.describe();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].owner, "feed");
        assert!(infos[0].options.maintain_state);
        assert_eq!(infos[0].options.description.as_deref(), Some("news feed"));
    }
}
