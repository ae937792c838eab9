//! Dynagym core library.
//!
//! This crate exposes the training harness for externally compiled MDP
//! simulation engines: the engine loading surface, the gym-style
//! environment adapter, the actor/critic networks, the PPO update and the
//! training driver. The binary (`src/main.rs`) is just a thin CLI around
//! these components.

pub mod artifact;
pub mod config;
pub mod engine;
pub mod env;
pub mod loader;
pub mod metrics;
pub mod nn;
pub mod paths;
pub mod ppo;
pub mod trainer;

// --- Re-exports for ergonomic external use ---------------------------------

pub use artifact::{ArtifactError, ArtifactMetadata, PolicySaver, SavedArtifact};

pub use config::{load_mdp_config, load_train_config, ConfigError, TrainConfig};

pub use engine::{
    Emulator, EmulatorStep, EngineError, EngineProvider, Mdp, MdpConfig, RawObservation,
};

pub use env::{ActionSpace, EnvError, MdpEnv, Observation, ObservationSpace, StepOutcome, VecEnv};

pub use loader::{load_engine, LoadError, LoadedEngine};

pub use metrics::{EpochRecord, MetricsSink, MetricsWriter, NoopMetrics, RunHeader};

pub use nn::{ActorNetwork, CriticNetwork, MlpSpec};

pub use paths::DataRoot;

pub use ppo::{compute_gae, BatchData, EnvRollout, PpoUpdate, Regularizer, Transition};

pub use trainer::{Trainer, TrainError, TrainSummary};
