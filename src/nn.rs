// src/nn.rs
//
// Actor and critic networks.
//
// Both are MLPs built from the same block shape (linear -> layer norm ->
// ReLU) and differ only in their head: the actor maps to one logit per
// action, the critic to a single state value. The actor understands the
// action legality mask; the critic accepts one for interface symmetry but
// ignores it, since state values are defined regardless of which actions
// are currently legal.

use burn::module::Module;
use burn::nn::{LayerNorm, LayerNormConfig, Linear, LinearConfig, Relu};
use burn::tensor::activation::softmax;
use burn::tensor::backend::Backend;
use burn::tensor::{Bool, Tensor, TensorData};

use crate::config::TrainConfig;

/// Shape of an MLP: compiled once at construction, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MlpSpec {
    pub num_inputs: usize,
    pub hidden_dim: usize,
    pub n_layers: usize,
    pub num_outputs: usize,
}

impl MlpSpec {
    pub fn new(num_inputs: usize, hidden_dim: usize, n_layers: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            hidden_dim,
            n_layers,
            num_outputs,
        }
    }

    /// Spec for a network over `num_inputs` features, sized by the run
    /// configuration.
    pub fn from_config(config: &TrainConfig, num_inputs: usize, num_outputs: usize) -> Self {
        Self::new(num_inputs, config.hidden_dim, config.n_layers, num_outputs)
    }
}

/// One hidden block: linear -> layer norm -> ReLU.
#[derive(Module, Debug)]
pub struct MlpBlock<B: Backend> {
    linear: Linear<B>,
    norm: LayerNorm<B>,
    activation: Relu,
}

impl<B: Backend> MlpBlock<B> {
    fn new(d_input: usize, d_output: usize, device: &B::Device) -> Self {
        Self {
            linear: LinearConfig::new(d_input, d_output).init(device),
            norm: LayerNormConfig::new(d_output).init(device),
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        self.activation
            .forward(self.norm.forward(self.linear.forward(input)))
    }
}

fn build_blocks<B: Backend>(spec: &MlpSpec, device: &B::Device) -> Vec<MlpBlock<B>> {
    let mut blocks = Vec::with_capacity(spec.n_layers);
    let mut width = spec.num_inputs;
    for _ in 0..spec.n_layers {
        blocks.push(MlpBlock::new(width, spec.hidden_dim, device));
        width = spec.hidden_dim;
    }
    blocks
}

/// Policy network: features -> per-action logits / masked probabilities.
#[derive(Module, Debug)]
pub struct ActorNetwork<B: Backend> {
    blocks: Vec<MlpBlock<B>>,
    head: Linear<B>,
}

impl<B: Backend> ActorNetwork<B> {
    pub fn new(spec: &MlpSpec, device: &B::Device) -> Self {
        Self {
            blocks: build_blocks(spec, device),
            head: LinearConfig::new(spec.hidden_dim, spec.num_outputs).init(device),
        }
    }

    /// Raw per-action logits, `[batch, num_actions]`.
    pub fn logits(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = features;
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }

    /// Forward pass matching the sampling contract: with a mask, illegal
    /// logits are floored to f32::MIN and the result is a softmax over the
    /// legal actions; without one, the raw logits are returned unnormalized.
    /// `mask` is true where the action is legal.
    pub fn forward(&self, features: Tensor<B, 2>, mask: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 2> {
        let logits = self.logits(features);
        match mask {
            Some(mask) => softmax(masked_logits(logits, mask), 1),
            None => logits,
        }
    }
}

/// Floor the logits of illegal actions to `f32::MIN` (finite, so downstream
/// softmax/log-softmax stay free of NaN). `mask` is true where legal.
pub fn masked_logits<B: Backend>(logits: Tensor<B, 2>, mask: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
    logits.mask_fill(mask.bool_not(), f32::MIN)
}

/// Value network: features -> scalar state value, `[batch, 1]`.
#[derive(Module, Debug)]
pub struct CriticNetwork<B: Backend> {
    blocks: Vec<MlpBlock<B>>,
    head: Linear<B>,
}

impl<B: Backend> CriticNetwork<B> {
    pub fn new(spec: &MlpSpec, device: &B::Device) -> Self {
        Self {
            blocks: build_blocks(spec, device),
            head: LinearConfig::new(spec.hidden_dim, 1).init(device),
        }
    }

    /// The mask parameter is accepted for interface symmetry with the actor
    /// and deliberately unused: V(s) does not depend on action legality.
    pub fn forward(
        &self,
        features: Tensor<B, 2>,
        _mask: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 2> {
        let mut x = features;
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }
}

/// Pack per-row feature vectors into a `[batch, num_features]` tensor.
pub fn features_to_tensor<B: Backend>(
    rows: &[Vec<f32>],
    num_features: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    let mut flat = Vec::with_capacity(rows.len() * num_features);
    for row in rows {
        debug_assert_eq!(row.len(), num_features);
        flat.extend_from_slice(row);
    }
    Tensor::<B, 1>::from_data(
        TensorData::from(flat.as_slice()).convert::<B::FloatElem>(),
        device,
    )
    .reshape([rows.len(), num_features])
}

/// Pack per-row legality masks into a `[batch, num_actions]` bool tensor.
pub fn mask_to_tensor<B: Backend>(
    rows: &[Vec<bool>],
    num_actions: usize,
    device: &B::Device,
) -> Tensor<B, 2, Bool> {
    let mut flat = Vec::with_capacity(rows.len() * num_actions);
    for row in rows {
        debug_assert_eq!(row.len(), num_actions);
        flat.extend_from_slice(row);
    }
    Tensor::<B, 1, Bool>::from_data(TensorData::from(flat.as_slice()), device)
        .reshape([rows.len(), num_actions])
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TB = NdArray<f32>;

    #[test]
    fn actor_and_critic_shapes() {
        let device = Default::default();
        let spec = MlpSpec::new(6, 16, 2, 4);
        let actor = ActorNetwork::<TB>::new(&spec, &device);
        let critic = CriticNetwork::<TB>::new(&spec, &device);

        let feats = features_to_tensor::<TB>(&[vec![0.1; 6], vec![0.2; 6]], 6, &device);
        assert_eq!(actor.logits(feats.clone()).dims(), [2, 4]);
        assert_eq!(critic.forward(feats, None).dims(), [2, 1]);
    }

    #[test]
    fn masked_forward_zeroes_illegal_actions_and_normalizes() {
        let device = Default::default();
        let spec = MlpSpec::new(5, 16, 2, 5);
        let actor = ActorNetwork::<TB>::new(&spec, &device);

        let feats = features_to_tensor::<TB>(&[vec![0.3; 5]], 5, &device);
        let mask = mask_to_tensor::<TB>(&[vec![true, false, true, true, false]], 5, &device);

        let probs: Vec<f32> = actor
            .forward(feats, Some(mask))
            .into_data()
            .to_vec()
            .unwrap();
        assert!(probs[1] < 1e-6, "illegal action kept probability {}", probs[1]);
        assert!(probs[4] < 1e-6, "illegal action kept probability {}", probs[4]);
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn masking_beats_an_equal_logit() {
        let device = Default::default();
        // Two actions share the same logit; masking one must leave it with
        // strictly less probability than its unmasked twin.
        let logits = Tensor::<TB, 2>::from_floats([[1.0, 1.0, 0.0]], &device);
        let mask = mask_to_tensor::<TB>(&[vec![true, false, true]], 3, &device);

        let probs: Vec<f32> = softmax(masked_logits(logits, mask), 1)
            .into_data()
            .to_vec()
            .unwrap();
        assert!(probs[1] < probs[0]);
        assert!(probs[1] < 1e-6);
        assert!(probs[0] > probs[2]);
    }

    #[test]
    fn unmasked_forward_returns_raw_logits() {
        let device = Default::default();
        let spec = MlpSpec::new(4, 8, 1, 3);
        let actor = ActorNetwork::<TB>::new(&spec, &device);

        let feats = features_to_tensor::<TB>(&[vec![0.5; 4]], 4, &device);
        let fwd: Vec<f32> = actor
            .forward(feats.clone(), None)
            .into_data()
            .to_vec()
            .unwrap();
        let logits: Vec<f32> = actor.logits(feats).into_data().to_vec().unwrap();
        assert_eq!(fwd, logits);
    }
}
