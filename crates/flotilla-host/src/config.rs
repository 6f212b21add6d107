//! Host configuration: YAML file plus environment overrides
use crate::HostError;
use flotilla_core::CoordinatorConfig;
use flotilla_engine::ForkRequest;
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "FLOTILLA_CONFIG";
pub const ADDR_ENV: &str = "FLOTILLA_ADDR";

fn default_addr() -> String {
    "0.0.0.0:8787".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainEngineConfig {
    #[serde(default = "MainEngineConfig::default_label")]
    pub label: String,
    #[serde(default = "MainEngineConfig::default_allow_headless")]
    pub allow_headless: bool,
    /// Route pushed once the main engine runs
    #[serde(default = "MainEngineConfig::default_initial_route")]
    pub initial_route: Option<String>,
}

impl MainEngineConfig {
    fn default_label() -> String {
        "main".to_string()
    }

    fn default_allow_headless() -> bool {
        true
    }

    fn default_initial_route() -> Option<String> {
        Some("/home".to_string())
    }
}

impl Default for MainEngineConfig {
    fn default() -> Self {
        Self {
            label: Self::default_label(),
            allow_headless: Self::default_allow_headless(),
            initial_route: Self::default_initial_route(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default)]
    pub main_engine: MainEngineConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Forks of the main engine started at boot
    #[serde(default)]
    pub forks: Vec<ForkRequest>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            main_engine: MainEngineConfig::default(),
            coordinator: CoordinatorConfig::default(),
            forks: Vec::new(),
        }
    }
}

impl HostConfig {
    /// Read a YAML config file
    pub fn load(path: &str) -> Result<Self, HostError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HostError::Config(format!("failed to read {path}: {e}")))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, HostError> {
        serde_yaml::from_str(yaml).map_err(|e| HostError::Config(e.to_string()))
    }

    /// `FLOTILLA_CONFIG` if set, defaults otherwise; `FLOTILLA_ADDR` wins
    /// over the file's address.
    pub fn from_env() -> Result<Self, HostError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(&path)?,
            Err(_) => Self::default(),
        };
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            config.addr = addr;
        }
        Ok(config)
    }
}
