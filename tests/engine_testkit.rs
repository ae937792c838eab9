// tests/engine_testkit.rs
//
// Shared test fixture: a small in-process inventory-control engine.
// Exercises the whole provider surface without a dynamic library, so the
// harness tests run against the same traits a real engine would implement.
//
// Note: This module is included via #[path] from other test files.
// The dead_code warnings are suppressed because not all helpers are used
// in every test file that includes this module.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;

use dynagym::{
    Emulator, EmulatorStep, EngineError, EngineProvider, LoadedEngine, Mdp, MdpConfig,
    RawObservation,
};

/// Inventory MDP: hold 0..=capacity units, each decision orders 0..=2 more,
/// random demand 0..=2 is served afterwards. Holding costs one reward unit
/// per stored unit, every unserved demand unit costs four. Actions that
/// would overflow the capacity are illegal, so the mask is state-dependent.
pub struct ToyInventoryMdp {
    pub capacity: i64,
    pub holding_cost: f64,
    pub stockout_cost: f64,
}

pub const TOY_MAX_ORDER: usize = 2;

impl ToyInventoryMdp {
    pub fn from_config(config: &MdpConfig) -> Self {
        Self {
            capacity: config.get_i64("capacity").unwrap_or(5),
            holding_cost: config.get_f64("holding_cost").unwrap_or(1.0),
            stockout_cost: config.get_f64("stockout_cost").unwrap_or(4.0),
        }
    }
}

impl Mdp for ToyInventoryMdp {
    fn identifier(&self) -> String {
        "toy_inventory".to_string()
    }

    fn num_flat_features(&self) -> usize {
        // Normalized inventory level + last served demand.
        2
    }

    fn num_valid_actions(&self) -> usize {
        TOY_MAX_ORDER + 1
    }
}

pub struct ToyEmulator {
    mdp: Arc<ToyInventoryMdp>,
    inventory: i64,
    last_demand: i64,
    rng: ChaCha8Rng,
    actions_taken: u64,
    actions_until_done: u64,
}

impl ToyEmulator {
    fn observation(&self) -> RawObservation {
        let capacity = self.mdp.capacity as f32;
        let mask = (0..=TOY_MAX_ORDER)
            .map(|order| self.inventory + order as i64 <= self.mdp.capacity)
            .collect();
        RawObservation {
            features: vec![
                self.inventory as f32 / capacity,
                self.last_demand as f32 / TOY_MAX_ORDER as f32,
            ],
            mask,
        }
    }
}

impl Emulator for ToyEmulator {
    fn reset(&mut self, seed: u64) -> Result<RawObservation, EngineError> {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.inventory = (self.rng.next_u64() % (self.mdp.capacity as u64 + 1)) as i64;
        self.last_demand = 0;
        self.actions_taken = 0;
        Ok(self.observation())
    }

    fn step(&mut self, action: usize) -> Result<EmulatorStep, EngineError> {
        if action > TOY_MAX_ORDER {
            return Err(EngineError::new(format!("action {action} out of range")));
        }
        if self.inventory + action as i64 > self.mdp.capacity {
            return Err(EngineError::new(format!(
                "illegal order of {action} at inventory {}",
                self.inventory
            )));
        }

        self.inventory += action as i64;
        let demand = (self.rng.next_u64() % (TOY_MAX_ORDER as u64 + 1)) as i64;
        let served = demand.min(self.inventory);
        let unserved = demand - served;
        self.inventory -= served;
        self.last_demand = served;
        self.actions_taken += 1;

        let reward = -(self.mdp.holding_cost * self.inventory as f64
            + self.mdp.stockout_cost * unserved as f64);
        let truncated =
            self.actions_until_done > 0 && self.actions_taken >= self.actions_until_done;

        Ok(EmulatorStep {
            observation: self.observation(),
            reward,
            terminated: false,
            truncated,
            info: json!({ "demand": demand }),
        })
    }

    fn observation_space_size(&self) -> usize {
        self.mdp.num_flat_features()
    }

    fn action_space_size(&self) -> usize {
        self.mdp.num_valid_actions()
    }
}

/// Provider keeping a concrete handle to the MDP it last constructed, so
/// emulators honor the parameters `get_mdp` was given (the trait hands the
/// provider back an `Arc<dyn Mdp>` it produced itself).
#[derive(Default)]
pub struct ToyProvider {
    last_mdp: Mutex<Option<Arc<ToyInventoryMdp>>>,
}

impl ToyProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EngineProvider for ToyProvider {
    fn get_mdp(&self, config: &MdpConfig) -> Result<Arc<dyn Mdp>, EngineError> {
        let mdp = ToyInventoryMdp::from_config(config);
        if mdp.capacity < TOY_MAX_ORDER as i64 {
            return Err(EngineError::new(format!(
                "capacity {} below the maximum order size",
                mdp.capacity
            )));
        }
        let mdp = Arc::new(mdp);
        *self.last_mdp.lock().unwrap() = Some(Arc::clone(&mdp));
        Ok(mdp)
    }

    fn get_gym_emulator(
        &self,
        mdp: Arc<dyn Mdp>,
        num_actions_until_done: u64,
        _num_periods_until_done: u64,
    ) -> Result<Box<dyn Emulator>, EngineError> {
        let concrete = self
            .last_mdp
            .lock()
            .unwrap()
            .clone()
            .filter(|own| own.identifier() == mdp.identifier())
            .ok_or_else(|| EngineError::new("mdp does not belong to this engine"))?;
        Ok(Box::new(ToyEmulator {
            mdp: concrete,
            inventory: 0,
            last_demand: 0,
            rng: ChaCha8Rng::seed_from_u64(0),
            actions_taken: 0,
            actions_until_done: num_actions_until_done,
        }))
    }
}

/// In-process engine handle over the toy provider.
pub fn toy_engine() -> LoadedEngine {
    LoadedEngine::from_provider(Box::new(ToyProvider::new()))
}

/// Default construction parameters for the toy MDP.
pub fn toy_config() -> MdpConfig {
    serde_json::from_value(json!({
        "capacity": 5,
        "holding_cost": 1.0,
        "stockout_cost": 4.0,
    }))
    .unwrap()
}
