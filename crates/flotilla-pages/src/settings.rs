//! Route settings handed to builders, and the page description they return
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a navigation wants to go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSettings {
    /// Route id (ex: "/home")
    pub url: String,
    /// Position of this page among pages with the same url on a stack
    pub index: u32,
    /// Caller supplied arguments
    #[serde(default)]
    pub params: Value,
}

impl RouteSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: 0,
            params: Value::Null,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

/// Description of a constructed page, consumed by the UI engine runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub route: String,
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub params: Value,
}

impl PageSpec {
    pub fn from_settings(settings: &RouteSettings) -> Self {
        Self {
            route: settings.url.clone(),
            index: settings.index,
            title: None,
            params: settings.params.clone(),
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}
