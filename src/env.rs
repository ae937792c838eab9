// src/env.rs
//
// Gym-style environment adapter over an engine emulator.
//
// The adapter owns its emulator exclusively and adds the two things the
// trainer needs on top of the raw engine surface: validated observations
// (feature and mask lengths are checked against the announced spaces on
// every transition) and reproducible seeding (an unseeded reset draws the
// engine seed from the adapter's own deterministic stream, so a run seeded
// once at construction replays exactly).

use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde_json::Value as JsonValue;

use crate::engine::{Emulator, EngineError, RawObservation};

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The engine emitted a mask whose length disagrees with its own
    /// announced action space. Always a bug in the engine binding; the
    /// run must not continue on a silently misaligned mask.
    #[error("action mask length {got} does not match action space size {expected}")]
    MaskLength { expected: usize, got: usize },

    #[error("feature vector length {got} does not match observation space size {expected}")]
    FeatureLength { expected: usize, got: usize },

    #[error("environment construction failed: {0}")]
    Construction(String),
}

/// A validated observation: flat features plus the action legality mask.
/// `mask[a]` is true iff action `a` may be taken in this state.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub features: Vec<f32>,
    pub mask: Vec<bool>,
}

/// One environment transition.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: JsonValue,
}

impl StepOutcome {
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Shape of the observations an environment produces: an unbounded real
/// feature vector plus a binary legality mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservationSpace {
    pub num_features: usize,
    pub num_actions: usize,
}

/// Discrete action space of size `n` (== mask length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpace {
    pub n: usize,
}

/// Single environment wrapping one emulator instance.
pub struct MdpEnv {
    emulator: Box<dyn Emulator>,
    num_features: usize,
    num_actions: usize,
    rng: ChaCha8Rng,
}

impl MdpEnv {
    /// Wrap `emulator`; `rng_seed` seeds the stream used when `reset` is
    /// called without an explicit engine seed.
    pub fn new(emulator: Box<dyn Emulator>, rng_seed: u64) -> Result<Self, EnvError> {
        let num_features = emulator.observation_space_size();
        let num_actions = emulator.action_space_size();
        if num_features == 0 || num_actions == 0 {
            return Err(EnvError::Construction(format!(
                "emulator announced degenerate spaces: {num_features} features, \
                 {num_actions} actions"
            )));
        }
        Ok(Self {
            emulator,
            num_features,
            num_actions,
            rng: ChaCha8Rng::seed_from_u64(rng_seed),
        })
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_actions(&self) -> usize {
        self.num_actions
    }

    pub fn observation_space(&self) -> ObservationSpace {
        ObservationSpace {
            num_features: self.num_features,
            num_actions: self.num_actions,
        }
    }

    pub fn action_space(&self) -> ActionSpace {
        ActionSpace {
            n: self.num_actions,
        }
    }

    fn validate(&self, raw: RawObservation) -> Result<Observation, EnvError> {
        if raw.mask.len() != self.num_actions {
            return Err(EnvError::MaskLength {
                expected: self.num_actions,
                got: raw.mask.len(),
            });
        }
        if raw.features.len() != self.num_features {
            return Err(EnvError::FeatureLength {
                expected: self.num_features,
                got: raw.features.len(),
            });
        }
        Ok(Observation {
            features: raw.features,
            mask: raw.mask,
        })
    }

    /// Reset to an initial state. With `seed: None` the engine seed is
    /// drawn from the adapter's own stream, so successive unseeded resets
    /// differ from each other but replay identically across runs.
    pub fn reset(&mut self, seed: Option<u64>) -> Result<Observation, EnvError> {
        let seed = seed.unwrap_or_else(|| self.rng.gen());
        let raw = self.emulator.reset(seed)?;
        self.validate(raw)
    }

    /// Apply `action` and advance to the next decision point.
    pub fn step(&mut self, action: usize) -> Result<StepOutcome, EnvError> {
        let step = self.emulator.step(action)?;
        Ok(StepOutcome {
            observation: self.validate(step.observation)?,
            reward: step.reward,
            terminated: step.terminated,
            truncated: step.truncated,
            info: step.info,
        })
    }
}

impl std::fmt::Debug for MdpEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdpEnv")
            .field("num_features", &self.num_features)
            .field("num_actions", &self.num_actions)
            .finish()
    }
}

/// Fixed-size collection of homogeneous environments, stepped in lockstep.
/// Stepping is sequential in index order, which keeps collection
/// deterministic for a given seed.
#[derive(Debug)]
pub struct VecEnv {
    envs: Vec<MdpEnv>,
}

impl VecEnv {
    pub fn new(envs: Vec<MdpEnv>) -> Result<Self, EnvError> {
        let first = envs
            .first()
            .ok_or_else(|| EnvError::Construction("VecEnv needs at least one environment".into()))?;
        let (nf, na) = (first.num_features(), first.num_actions());
        for (i, env) in envs.iter().enumerate() {
            if env.num_features() != nf || env.num_actions() != na {
                return Err(EnvError::Construction(format!(
                    "environment {i} has spaces ({}, {}) but environment 0 has ({nf}, {na})",
                    env.num_features(),
                    env.num_actions()
                )));
            }
        }
        Ok(Self { envs })
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    pub fn num_features(&self) -> usize {
        self.envs[0].num_features()
    }

    pub fn num_actions(&self) -> usize {
        self.envs[0].num_actions()
    }

    /// Reset every environment. `seeds`, when given, must supply one seed
    /// per environment.
    pub fn reset_all(&mut self, seeds: Option<&[u64]>) -> Result<Vec<Observation>, EnvError> {
        if let Some(seeds) = seeds {
            if seeds.len() != self.envs.len() {
                return Err(EnvError::Construction(format!(
                    "got {} seeds for {} environments",
                    seeds.len(),
                    self.envs.len()
                )));
            }
        }
        self.envs
            .iter_mut()
            .enumerate()
            .map(|(i, env)| env.reset(seeds.map(|s| s[i])))
            .collect()
    }

    /// Reset a single environment (used when an episode finishes mid-batch).
    pub fn reset_env(&mut self, index: usize, seed: Option<u64>) -> Result<Observation, EnvError> {
        self.envs[index].reset(seed)
    }

    /// Step a single environment.
    pub fn step_one(&mut self, index: usize, action: usize) -> Result<StepOutcome, EnvError> {
        self.envs[index].step(action)
    }

    /// Step every environment with its own action, in index order.
    pub fn step(&mut self, actions: &[usize]) -> Result<Vec<StepOutcome>, EnvError> {
        if actions.len() != self.envs.len() {
            return Err(EnvError::Construction(format!(
                "got {} actions for {} environments",
                actions.len(),
                self.envs.len()
            )));
        }
        self.envs
            .iter_mut()
            .zip(actions)
            .map(|(env, &a)| env.step(a))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EmulatorStep;

    struct StubEmulator {
        mask_len: usize,
    }

    impl Emulator for StubEmulator {
        fn reset(&mut self, seed: u64) -> Result<RawObservation, EngineError> {
            Ok(RawObservation {
                features: vec![seed as f32; 3],
                mask: vec![true; self.mask_len],
            })
        }

        fn step(&mut self, _action: usize) -> Result<EmulatorStep, EngineError> {
            Ok(EmulatorStep {
                observation: RawObservation {
                    features: vec![0.0; 3],
                    mask: vec![true; self.mask_len],
                },
                reward: 1.0,
                terminated: false,
                truncated: false,
                info: JsonValue::Null,
            })
        }

        fn observation_space_size(&self) -> usize {
            3
        }

        fn action_space_size(&self) -> usize {
            4
        }
    }

    #[test]
    fn mask_length_mismatch_is_fatal() {
        let mut env = MdpEnv::new(Box::new(StubEmulator { mask_len: 3 }), 0).unwrap();
        match env.reset(Some(1)) {
            Err(EnvError::MaskLength { expected: 4, got: 3 }) => {}
            other => panic!("expected MaskLength, got {other:?}"),
        }
    }

    #[test]
    fn explicit_seed_is_forwarded_to_the_engine() {
        let mut env = MdpEnv::new(Box::new(StubEmulator { mask_len: 4 }), 0).unwrap();
        let a = env.reset(Some(7)).unwrap();
        let b = env.reset(Some(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.features, vec![7.0; 3]);
    }

    #[test]
    fn unseeded_resets_replay_across_identically_seeded_adapters() {
        let mut x = MdpEnv::new(Box::new(StubEmulator { mask_len: 4 }), 42).unwrap();
        let mut y = MdpEnv::new(Box::new(StubEmulator { mask_len: 4 }), 42).unwrap();
        for _ in 0..3 {
            assert_eq!(x.reset(None).unwrap(), y.reset(None).unwrap());
        }
        // Successive unseeded resets draw fresh engine seeds.
        let a = x.reset(None).unwrap();
        let b = x.reset(None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn vec_env_needs_at_least_one_env_and_matching_action_counts() {
        match VecEnv::new(Vec::new()) {
            Err(EnvError::Construction(_)) => {}
            other => panic!("expected Construction, got {other:?}"),
        }

        let ok = VecEnv::new(vec![
            MdpEnv::new(Box::new(StubEmulator { mask_len: 4 }), 0).unwrap(),
            MdpEnv::new(Box::new(StubEmulator { mask_len: 4 }), 1).unwrap(),
        ])
        .unwrap();
        assert_eq!(ok.len(), 2);
        assert_eq!(ok.num_actions(), 4);
    }
}
