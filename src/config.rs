use crate::engine::registry;
use crate::engine::types::GraphMode;
use crate::error::CompileError;
use serde::{Deserialize, Serialize};

/// Knobs for the emitted program that are not part of either graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model_class_name: String,
    pub data_root: String,
    /// Loss operator used when the architecture graph has none.
    pub fallback_loss: String,
    /// Training steps between two loss reports.
    pub log_interval: u32,
    pub checkpoint_dir: String,
    pub default_epochs: u32,
    pub default_batch_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_class_name: "NeuralNetwork".to_string(),
            data_root: "./data".to_string(),
            fallback_loss: "crossentropyloss".to_string(),
            log_interval: 100,
            checkpoint_dir: "checkpoints".to_string(),
            default_epochs: 10,
            default_batch_size: 64,
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, CompileError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CompileError> {
        let name = &self.model_class_name;
        let is_identifier = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_identifier {
            return Err(CompileError::parameter(
                "config",
                format!("model_class_name '{}' is not a Python identifier", name),
            ));
        }

        match registry::lookup(GraphMode::Architecture, &self.fallback_loss) {
            Some(spec) if spec.is_loss() => {}
            _ => {
                return Err(CompileError::parameter(
                    "config",
                    format!("fallback_loss '{}' is not a loss operator", self.fallback_loss),
                ));
            }
        }

        if self.log_interval == 0 || self.default_epochs == 0 || self.default_batch_size == 0 {
            return Err(CompileError::parameter(
                "config",
                "log_interval, default_epochs and default_batch_size must be positive",
            ));
        }
        Ok(())
    }
}
