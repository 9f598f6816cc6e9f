//! Server configuration

use anyhow::{bail, Context, Result};
use clf_lib::cost::{CostModel, DEFAULT_BITS_PER_UNIT, DEFAULT_UNITS_NUM};
use clf_lib::policy::PolicyConfig;
use clf_lib::session::DEFAULT_MAX_MESSAGE_BYTES;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "CLF_CONFIG";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface the predictor listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port for client sessions
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory train tokens are resolved against
    #[serde(default = "default_dataset_root")]
    pub dataset_root: PathBuf,

    /// Directory holding the persisted model
    #[serde(default = "default_model_root")]
    pub model_root: PathBuf,

    #[serde(default = "default_model_file_name")]
    pub model_file_name: String,

    /// Filter bits per unit used by the cost model
    #[serde(default = "default_bits_per_unit")]
    pub bits_per_unit: f64,

    /// Relative cost deviation that triggers a retrain
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Class answered before the first model is trained
    #[serde(default = "default_default_class")]
    pub default_class: usize,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Load a model left on disk by a previous run
    #[serde(default)]
    pub restore_on_start: bool,

    /// Name reported in structured logs
    #[serde(default = "default_node_name")]
    pub node_name: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_dataset_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_model_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_model_file_name() -> String {
    "filter_class_model.json".to_string()
}

fn default_bits_per_unit() -> f64 {
    DEFAULT_BITS_PER_UNIT
}

fn default_drift_threshold() -> f64 {
    0.1
}

fn default_default_class() -> usize {
    DEFAULT_UNITS_NUM
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dataset_root: default_dataset_root(),
            model_root: default_model_root(),
            model_file_name: default_model_file_name(),
            bits_per_unit: default_bits_per_unit(),
            drift_threshold: default_drift_threshold(),
            default_class: default_default_class(),
            api_port: default_api_port(),
            max_message_bytes: default_max_message_bytes(),
            restore_on_start: false,
            node_name: default_node_name(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the `CLF_CONFIG` file (if set) and `CLF_*` environment
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from);
        Self::from_sources(file.as_deref(), true)
    }

    /// Build from an optional file, optionally overlaid with the environment
    pub fn from_sources(file: Option<&Path>, with_env: bool) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        if with_env {
            builder = builder.add_source(config::Environment::with_prefix("CLF").try_parsing(true));
        }

        let config: ServerConfig = builder
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.bits_per_unit.is_finite() || self.bits_per_unit <= 0.0 {
            bail!("bits_per_unit must be positive, got {}", self.bits_per_unit);
        }
        if !self.drift_threshold.is_finite() || self.drift_threshold <= 0.0 {
            bail!(
                "drift_threshold must be a positive number, got {}",
                self.drift_threshold
            );
        }
        if self.max_message_bytes == 0 {
            bail!("max_message_bytes must be at least 1");
        }
        if self.model_file_name.trim().is_empty() {
            bail!("model_file_name must not be empty");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            model_root: self.model_root.clone(),
            model_file_name: self.model_file_name.clone(),
            drift_threshold: self.drift_threshold,
            default_class: self.default_class,
        }
    }

    pub fn cost_model(&self) -> Result<CostModel> {
        CostModel::new(self.bits_per_unit).context("Invalid cost model parameters")
    }
}
