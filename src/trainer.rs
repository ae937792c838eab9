// src/trainer.rs
//
// Training driver: collect, update, evaluate, checkpoint.
//
// One trainer owns everything a run needs: the parallel training and
// evaluation environments, the actor/critic pair, both optimizers, the
// metric sink and the best-policy artifact path. Each epoch gathers a
// fixed number of transitions across the training environments with
// stochastic (mask-aware) action sampling, runs a PPO update, decays the
// shared learning rate, evaluates greedily on held-out environments and
// saves the policy whenever the evaluation mean improves.
//
// All randomness flows from the single run seed: per-environment reset
// streams, action sampling, and minibatch shuffling each draw from
// streams derived from it, so a run replays exactly.

use std::path::PathBuf;
use std::sync::Arc;

use burn::optim::AdamConfig;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::Rng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::artifact::{ArtifactError, ArtifactMetadata, PolicySaver, SavedArtifact};
use crate::config::TrainConfig;
use crate::engine::{EngineError, Mdp};
use crate::env::{EnvError, MdpEnv, Observation, VecEnv};
use crate::loader::LoadedEngine;
use crate::metrics::{EpochRecord, MetricsSink, RunHeader};
use crate::nn::{features_to_tensor, mask_to_tensor, ActorNetwork, CriticNetwork, MlpSpec};
use crate::paths::DataRoot;
use crate::ppo::{BatchData, EnvRollout, PpoUpdate, Regularizer, Transition};

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("failed to write metrics: {0}")]
    Metrics(#[from] std::io::Error),
    #[error("invalid training configuration: {0}")]
    Config(String),
    #[error("action sampling failed: {0}")]
    Sampling(String),
    #[error("tensor readback failed: {0}")]
    Readback(String),
}

/// End-of-run report.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs_run: u64,
    pub total_steps: usize,
    pub final_lr: f64,
    pub best_eval_reward: Option<f64>,
    pub artifact: Option<SavedArtifact>,
}

/// Name under which the best policy is stored (without extension).
pub const BEST_POLICY_NAME: &str = "ppo_policy";

pub struct Trainer<B: AutodiffBackend> {
    mdp: Arc<dyn Mdp>,
    train_envs: VecEnv,
    test_envs: VecEnv,
    config: TrainConfig,
    device: B::Device,
    rng: ChaCha8Rng,
    saver: PolicySaver,
    policy_path: PathBuf,
    metrics: Box<dyn MetricsSink>,
    run_name: String,
    seed: u64,
}

impl<B: AutodiffBackend> Trainer<B> {
    /// Build a trainer over `engine` and an already constructed MDP:
    /// creates the training and evaluation environment sets and the output
    /// paths under `data_root`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: &LoadedEngine,
        mdp: Arc<dyn Mdp>,
        config: TrainConfig,
        data_root: &DataRoot,
        run_name: &str,
        seed: u64,
        metrics: Box<dyn MetricsSink>,
        device: B::Device,
    ) -> Result<Self, TrainError> {
        config.validate().map_err(TrainError::Config)?;

        let provider = engine.provider();
        let mut seed_rng = ChaCha8Rng::seed_from_u64(seed);

        let mut build_envs = |count: usize, actions_until_done: u64| -> Result<VecEnv, TrainError> {
            let mut envs = Vec::with_capacity(count);
            for _ in 0..count {
                let emulator =
                    provider.get_gym_emulator(Arc::clone(&mdp), actions_until_done, 0)?;
                envs.push(MdpEnv::new(emulator, seed_rng.gen())?);
            }
            Ok(VecEnv::new(envs)?)
        };

        let train_envs = build_envs(config.nr_train_envs, config.num_actions_until_done)?;
        let test_envs = build_envs(config.nr_test_envs, config.num_steps_per_test_episode)?;

        let policy_path = data_root.policy_path(&mdp.identifier(), BEST_POLICY_NAME);
        Ok(Self {
            mdp,
            train_envs,
            test_envs,
            config,
            device,
            rng: ChaCha8Rng::seed_from_u64(seed_rng.gen()),
            saver: *engine.saver(),
            policy_path,
            metrics,
            run_name: run_name.to_string(),
            seed,
        })
    }

    pub fn mdp(&self) -> &dyn Mdp {
        self.mdp.as_ref()
    }

    /// Run the full training loop and return the summary.
    pub fn run(&mut self) -> Result<TrainSummary, TrainError> {
        // Network initialization draws from the backend's global stream;
        // seeding it keeps whole runs replayable.
        B::seed(self.seed);

        let num_features = self.train_envs.num_features();
        let num_actions = self.train_envs.num_actions();
        let spec = MlpSpec::from_config(&self.config, num_features, num_actions);

        let mut actor = ActorNetwork::<B>::new(&spec, &self.device);
        let mut critic = CriticNetwork::<B>::new(&spec, &self.device);
        let mut actor_optim = AdamConfig::new().init();
        let mut critic_optim = AdamConfig::new().init();

        let update = PpoUpdate {
            clip_eps: self.config.clip_eps,
            batch_size: self.config.batch_size,
            repeat: self.config.repeat_per_collect,
            regularizers: vec![
                Regularizer::EntropyBonus {
                    coef: self.config.entropy_coef,
                },
                Regularizer::ValueWindow {
                    range: self.config.value_window,
                },
            ],
        };

        self.metrics.record_header(&RunHeader::new(
            &self.run_name,
            &self.mdp.identifier(),
            config_hash(&self.config),
            self.seed,
        ))?;

        let metadata = ArtifactMetadata::new(num_features, num_actions);
        let mut lr = self.config.lr;
        let mut best_eval: Option<f64> = None;
        let mut artifact: Option<SavedArtifact> = None;
        let mut total_steps = 0usize;
        let mut obs = self.train_envs.reset_all(None)?;

        for epoch in 1..=self.config.max_epoch {
            let (rollouts, reward_mean, steps) = self.collect(&actor, &critic, &mut obs)?;
            total_steps += steps;

            let batch = BatchData::from_rollouts(
                &rollouts,
                self.config.discount_factor as f32,
                self.config.gae_lambda as f32,
            );
            let (a, c, stats) = update.run(
                actor,
                critic,
                &mut actor_optim,
                &mut critic_optim,
                lr,
                &batch,
                &mut self.rng,
                &self.device,
            );
            actor = a;
            critic = c;

            let eval_mean = self.evaluate(&actor)?;
            let improved = best_eval.map_or(true, |b| eval_mean > b);
            if improved {
                best_eval = Some(eval_mean);
                artifact = Some(self.saver.save(&actor, &metadata, &self.policy_path)?);
            }

            let mut record = EpochRecord::new(epoch);
            record.lr = lr;
            record.steps_collected = steps;
            record.policy_loss = stats.policy_loss;
            record.value_loss = stats.value_loss;
            record.entropy = stats.entropy;
            record.approx_kl = stats.approx_kl;
            record.train_reward_mean = reward_mean;
            record.eval_reward_mean = Some(eval_mean);
            record.best_eval_reward = best_eval;
            self.metrics.record_epoch(&record)?;

            lr *= self.config.lr_decay;
        }

        Ok(TrainSummary {
            epochs_run: self.config.max_epoch,
            total_steps,
            final_lr: lr,
            best_eval_reward: best_eval,
            artifact,
        })
    }

    /// Gather at least `step_per_collect` transitions across the training
    /// environments, stepping them in lockstep. `obs` carries the current
    /// observations across epochs so episodes continue where they left off.
    fn collect(
        &mut self,
        actor: &ActorNetwork<B>,
        critic: &CriticNetwork<B>,
        obs: &mut Vec<Observation>,
    ) -> Result<(Vec<EnvRollout>, f64, usize), TrainError> {
        let n_envs = self.train_envs.len();
        let num_features = self.train_envs.num_features();
        let num_actions = self.train_envs.num_actions();

        let mut rollouts = vec![EnvRollout::default(); n_envs];
        let mut reward_sum = 0.0f64;
        let mut steps = 0usize;

        // The budget is binding: the final lockstep round may overshoot it
        // by at most n_envs - 1 transitions, and validate() guarantees the
        // buffer capacity covers the budget itself.
        while steps < self.config.step_per_collect {
            let (probs, values) =
                self.policy_batch(actor, critic, obs, num_features, num_actions)?;

            let mut actions = Vec::with_capacity(n_envs);
            let mut log_probs = Vec::with_capacity(n_envs);
            for row in probs.chunks(num_actions) {
                let dist = WeightedIndex::new(row)
                    .map_err(|e| TrainError::Sampling(e.to_string()))?;
                let action = dist.sample(&mut self.rng);
                actions.push(action);
                log_probs.push(row[action].max(f32::MIN_POSITIVE).ln());
            }

            let outcomes = self.train_envs.step(&actions)?;
            for (i, outcome) in outcomes.into_iter().enumerate() {
                reward_sum += outcome.reward;
                rollouts[i].push(Transition {
                    features: std::mem::take(&mut obs[i].features),
                    mask: std::mem::take(&mut obs[i].mask),
                    action: actions[i],
                    log_prob: log_probs[i],
                    reward: outcome.reward as f32,
                    value: values[i],
                    done: outcome.is_done(),
                });
                obs[i] = if outcome.is_done() {
                    self.train_envs.reset_env(i, None)?
                } else {
                    outcome.observation
                };
            }
            steps += n_envs;
        }

        // Bootstrap from the states the collection stopped in; ignored by
        // GAE for environments whose last transition ended an episode.
        let (_, tail_values) =
            self.policy_batch(actor, critic, obs, num_features, num_actions)?;
        for (rollout, value) in rollouts.iter_mut().zip(tail_values) {
            rollout.bootstrap_value = value;
        }

        let reward_mean = if steps > 0 { reward_sum / steps as f64 } else { 0.0 };
        Ok((rollouts, reward_mean, steps))
    }

    /// Batched forward over the current observations of every environment;
    /// returns flattened masked action probabilities and state values.
    fn policy_batch(
        &self,
        actor: &ActorNetwork<B>,
        critic: &CriticNetwork<B>,
        obs: &[Observation],
        num_features: usize,
        num_actions: usize,
    ) -> Result<(Vec<f32>, Vec<f32>), TrainError> {
        let features: Vec<Vec<f32>> = obs.iter().map(|o| o.features.clone()).collect();
        let masks: Vec<Vec<bool>> = obs.iter().map(|o| o.mask.clone()).collect();
        let feats_t = features_to_tensor::<B>(&features, num_features, &self.device);
        let mask_t = mask_to_tensor::<B>(&masks, num_actions, &self.device);

        let probs = read_floats(actor.forward(feats_t.clone(), Some(mask_t)))?;
        let values = read_floats(critic.forward(feats_t, None))?;
        Ok((probs, values))
    }

    /// Greedy evaluation: run `episode_per_test` episodes on the held-out
    /// environments, always taking the highest-probability legal action.
    fn evaluate(&mut self, actor: &ActorNetwork<B>) -> Result<f64, TrainError> {
        let n_episodes = self.config.episode_per_test;
        if n_episodes == 0 {
            return Ok(0.0);
        }
        let num_features = self.test_envs.num_features();
        let num_actions = self.test_envs.num_actions();
        let step_cap = self.config.num_steps_per_test_episode.max(1);

        let mut total = 0.0f64;
        for episode in 0..n_episodes {
            let env_index = episode % self.test_envs.len();
            let mut ob = self.test_envs.reset_env(env_index, None)?;
            for _ in 0..step_cap {
                let feats_t =
                    features_to_tensor::<B>(&[ob.features.clone()], num_features, &self.device);
                let mask_t = mask_to_tensor::<B>(&[ob.mask.clone()], num_actions, &self.device);
                let probs = read_floats(actor.forward(feats_t, Some(mask_t)))?;
                let action = argmax(&probs);
                let outcome = self.test_envs.step_one(env_index, action)?;
                total += outcome.reward;
                if outcome.is_done() {
                    break;
                }
                ob = outcome.observation;
            }
        }
        Ok(total / n_episodes as f64)
    }
}

fn read_floats<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, TrainError> {
    tensor
        .into_data()
        .to_vec()
        .map_err(|e| TrainError::Readback(format!("{e:?}")))
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

/// FNV-1a hash of the serialized configuration, for the run header.
pub fn config_hash(config: &TrainConfig) -> u64 {
    let encoded = serde_json::to_string(config).unwrap_or_default();
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in encoded.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argmax_picks_first_of_equal_maxima() {
        assert_eq!(argmax(&[0.1, 0.5, 0.5, 0.2]), 1);
        assert_eq!(argmax(&[1.0]), 0);
    }

    #[test]
    fn read_floats_returns_tensor_contents() {
        type TB = burn::backend::NdArray<f32>;
        let device = Default::default();
        let t = Tensor::<TB, 1>::from_floats([0.5, 1.5], &device);
        assert_eq!(read_floats(t).unwrap(), vec![0.5, 1.5]);
    }

    #[test]
    fn config_hash_is_stable_and_sensitive() {
        let a = TrainConfig::default();
        let mut b = TrainConfig::default();
        assert_eq!(config_hash(&a), config_hash(&a));
        b.lr = 5e-4;
        assert_ne!(config_hash(&a), config_hash(&b));
    }
}
