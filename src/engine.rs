// src/engine.rs
//
// Interface to the external MDP simulation engine.
//
// The engine is a separate, compiled collaborator: dynagym never implements
// an MDP itself, it only drives one through these traits. A provider hands
// out MDP handles (static model descriptions) and emulators (stateful
// simulation instances). One emulator is owned by exactly one environment
// adapter, so no locking is needed anywhere on this surface.
//
// Engine failures are opaque to the harness and terminal to the run; there
// is no retry policy at this layer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Flat key -> value construction parameters for an MDP.
///
/// Mirrors the JSON config document: the harness treats the contents as
/// opaque and forwards them to the provider unchanged. Read-only after
/// construction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MdpConfig {
    params: BTreeMap<String, JsonValue>,
}

impl MdpConfig {
    pub fn new(params: BTreeMap<String, JsonValue>) -> Self {
        Self { params }
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.params.get(key)
    }

    /// Convenience accessor for integer-valued parameters.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(JsonValue::as_i64)
    }

    /// Convenience accessor for float-valued parameters.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(JsonValue::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.params.iter()
    }
}

/// Opaque engine-side failure. Terminal to the run.
#[derive(Debug, thiserror::Error)]
#[error("engine error: {message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Static description of an MDP model, shared between emulators.
pub trait Mdp: Send + Sync {
    /// Stable identifier used to key artifact and log directories.
    fn identifier(&self) -> String;

    /// Length of the flattened feature vector the emulator emits.
    fn num_flat_features(&self) -> usize;

    /// Size of the discrete action space (== action mask length).
    fn num_valid_actions(&self) -> usize;
}

/// Raw observation parts as produced by the engine: a flat feature vector
/// and the legality mask over the discrete action space.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub features: Vec<f32>,
    pub mask: Vec<bool>,
}

/// Result of advancing the emulator by one decision step. The engine may
/// simulate several internal periods before the next decision point.
#[derive(Debug, Clone)]
pub struct EmulatorStep {
    pub observation: RawObservation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: JsonValue,
}

/// A stateful simulation instance. Owned exclusively by one adapter.
pub trait Emulator: Send {
    /// Reset to an initial state drawn from `seed`. Equal seeds on fresh
    /// emulators must yield equal initial observations (engine determinism
    /// contract).
    fn reset(&mut self, seed: u64) -> Result<RawObservation, EngineError>;

    /// Apply a discrete action and advance to the next decision point.
    fn step(&mut self, action: usize) -> Result<EmulatorStep, EngineError>;

    fn observation_space_size(&self) -> usize;

    fn action_space_size(&self) -> usize;
}

/// Factory surface exported by an engine library.
pub trait EngineProvider: Send {
    /// Construct an MDP from flat parameters.
    fn get_mdp(&self, config: &MdpConfig) -> Result<Arc<dyn Mdp>, EngineError>;

    /// Construct an emulator over `mdp`.
    ///
    /// `num_actions_until_done` > 0 truncates an episode after that many
    /// decisions; `num_periods_until_done` > 0 truncates after that many
    /// simulated periods. Zero disables the respective bound.
    fn get_gym_emulator(
        &self,
        mdp: Arc<dyn Mdp>,
        num_actions_until_done: u64,
        num_periods_until_done: u64,
    ) -> Result<Box<dyn Emulator>, EngineError>;
}

impl fmt::Debug for dyn EngineProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EngineProvider")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mdp_config_roundtrips_through_json() {
        let json = r#"{"id":"joint_replenishment","nrProducts":3,"holdingCost":0.25}"#;
        let cfg: MdpConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.get_i64("nrProducts"), Some(3));
        assert_eq!(cfg.get_f64("holdingCost"), Some(0.25));
        assert_eq!(
            cfg.get("id").and_then(JsonValue::as_str),
            Some("joint_replenishment")
        );

        let back = serde_json::to_string(&cfg).unwrap();
        let reparsed: MdpConfig = serde_json::from_str(&back).unwrap();
        assert_eq!(reparsed.get_i64("nrProducts"), Some(3));
    }
}
