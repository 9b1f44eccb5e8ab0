use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::RuntimeError;

/// Options recognized by the runtime handle and the Wasm backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Guard every evaluation with a lock so any registered thread may submit
    /// work. When false, only the thread that initialized may evaluate.
    #[serde(default = "default_true")]
    pub serialize_calls: bool,
    /// Require `initialize()` to run on the first thread that registered.
    #[serde(default = "default_true")]
    pub require_init_on_main_thread: bool,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Instruction budget per evaluation. `None` runs without fuel metering.
    pub fuel: Option<u64>,
    /// Number of compiled modules kept between evaluations (0 disables).
    #[serde(default = "default_module_cache")]
    pub module_cache: usize,
}

fn default_true() -> bool {
    true
}
fn default_module_cache() -> usize {
    64
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            serialize_calls: true,
            require_init_on_main_thread: true,
            engine: EngineConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuel: None,
            module_cache: default_module_cache(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        content.parse().map_err(|e| match e {
            RuntimeError::Config(msg) => {
                RuntimeError::Config(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }
}

impl FromStr for RuntimeConfig {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).map_err(|e| RuntimeError::Config(e.to_string()))
    }
}
