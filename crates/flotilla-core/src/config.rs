//! Coordinator configuration
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Run registration and sync init now, async init on a later trigger
    #[serde(default)]
    pub preboot: bool,
    /// Bound on the async init wait. None waits as long as hooks take.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub async_timeout_ms: Option<u64>,
}

impl CoordinatorConfig {
    pub fn async_timeout(&self) -> Option<Duration> {
        self.async_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_async_timeout_ms(mut self, ms: u64) -> Self {
        self.async_timeout_ms = Some(ms);
        self
    }

    pub fn preboot(mut self) -> Self {
        self.preboot = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_no_timeout() {
        let config: CoordinatorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CoordinatorConfig::default());
        assert!(config.async_timeout().is_none());
        assert!(!config.preboot);
    }

    #[test]
    fn test_timeout_in_millis() {
        let config = CoordinatorConfig::default().with_async_timeout_ms(250);
        assert_eq!(config.async_timeout(), Some(Duration::from_millis(250)));
    }
}
