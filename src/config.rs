// src/config.rs
//
// Startup configuration for the training harness.
//
// Two documents are loaded once at process start and are immutable for the
// run:
// - the MDP config: a flat JSON object of engine construction parameters
//   (no comments permitted — plain JSON);
// - the training config: hyperparameters with per-field defaults, so a
//   partial JSON document overrides only what it names.
//
// A missing file and a malformed document are distinct fatal errors with
// distinct user-facing messages.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::MdpConfig;

/// Configuration-load failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {path} not found; make sure the file exists and try again")]
    Missing {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config file {path}: {source}; JSON comments are not permitted")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|e| {
        let path = path.display().to_string();
        if e.kind() == io::ErrorKind::NotFound {
            ConfigError::Missing { path, source: e }
        } else {
            ConfigError::Io { path, source: e }
        }
    })
}

/// Load the MDP construction parameters from a JSON file.
pub fn load_mdp_config(path: &Path) -> Result<MdpConfig, ConfigError> {
    let raw = read_config_file(path)?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load training hyperparameters from a JSON file; absent fields keep their
/// defaults.
pub fn load_train_config(path: &Path) -> Result<TrainConfig, ConfigError> {
    let raw = read_config_file(path)?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

/// Flat hyperparameter record for a training run.
///
/// Defaults are sized for large discrete-action inventory MDPs; all fields
/// are overridable from JSON and immutable once the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Hidden width of both actor and critic MLPs.
    pub hidden_dim: usize,
    /// Number of linear -> layer-norm -> activation blocks.
    pub n_layers: usize,
    /// Initial Adam learning rate.
    pub lr: f64,
    /// Multiplicative learning-rate decay applied once per epoch.
    pub lr_decay: f64,
    /// Entropy bonus coefficient (subtracted from the policy loss).
    pub entropy_coef: f64,
    /// Discount factor gamma.
    pub discount_factor: f64,
    /// GAE lambda for advantage estimation.
    pub gae_lambda: f64,
    /// PPO clipping epsilon for the surrogate objective.
    pub clip_eps: f64,
    /// Half-width of the absolute value-prediction window penalty.
    ///
    /// Deliberately clamps value predictions to [-w, +w] rather than
    /// clipping relative to the previous estimate; see DESIGN.md.
    pub value_window: f64,
    /// Minibatch size for gradient updates.
    pub batch_size: usize,
    /// Environment transitions gathered per collection round.
    pub step_per_collect: usize,
    /// Upper bound on transitions held between updates.
    pub replay_buffer_size: usize,
    /// Update passes over each collected batch.
    pub repeat_per_collect: usize,
    /// Number of parallel training environments.
    pub nr_train_envs: usize,
    /// Number of held-out evaluation environments.
    pub nr_test_envs: usize,
    /// Total training epochs.
    pub max_epoch: u64,
    /// Episodes run per evaluation checkpoint.
    pub episode_per_test: usize,
    /// Episode bound (decisions) for training environments; 0 = unbounded.
    pub num_actions_until_done: u64,
    /// Episode bound (decisions) for evaluation environments.
    pub num_steps_per_test_episode: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            hidden_dim: 512,
            n_layers: 3,
            lr: 1e-3,
            lr_decay: 0.99,
            entropy_coef: 0.1,
            discount_factor: 0.99,
            gae_lambda: 0.95,
            clip_eps: 0.2,
            value_window: 0.2,
            batch_size: 1040,
            step_per_collect: 1040,
            replay_buffer_size: 1040,
            repeat_per_collect: 4,
            nr_train_envs: 48,
            nr_test_envs: 48,
            max_epoch: 500,
            episode_per_test: 10,
            num_actions_until_done: 0,
            num_steps_per_test_episode: 1040,
        }
    }
}

impl TrainConfig {
    /// Basic sanity checks before a run starts.
    pub fn validate(&self) -> Result<(), String> {
        if self.hidden_dim == 0 || self.n_layers == 0 {
            return Err("hidden_dim and n_layers must be positive".to_string());
        }
        if !(self.lr > 0.0) {
            return Err(format!("lr must be positive, got {}", self.lr));
        }
        if !(0.0..=1.0).contains(&self.discount_factor) {
            return Err(format!(
                "discount_factor must be in [0, 1], got {}",
                self.discount_factor
            ));
        }
        if !(0.0..=1.0).contains(&self.gae_lambda) {
            return Err(format!(
                "gae_lambda must be in [0, 1], got {}",
                self.gae_lambda
            ));
        }
        if self.batch_size == 0 || self.step_per_collect == 0 {
            return Err("batch_size and step_per_collect must be positive".to_string());
        }
        if self.replay_buffer_size < self.step_per_collect {
            return Err(format!(
                "replay_buffer_size {} cannot be below step_per_collect {}",
                self.replay_buffer_size, self.step_per_collect
            ));
        }
        if self.nr_train_envs == 0 {
            return Err("nr_train_envs must be positive".to_string());
        }
        Ok(())
    }
}
