//! Fixed-topology feedforward policy mapping a sensory vector to action probabilities.

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rng::SimRng;

/// Number of discrete actions an agent can take.
pub const ACTION_COUNT: usize = 5;
/// Length of the flattened sensory vector consumed by the default architecture.
pub const SENSORY_INPUT_SIZE: usize = 542;
/// Layer sizes used by agents: input, three hidden layers, action logits.
pub const DEFAULT_ARCHITECTURE: [usize; 5] = [SENSORY_INPUT_SIZE, 256, 128, 64, ACTION_COUNT];
/// Current on-disk schema version for serialized policies.
pub const POLICY_FORMAT_VERSION: u16 = 1;

const INIT_STD_DEV: f32 = 0.1;
const NUDGE_EPSILON: f32 = 0.01;

/// Errors raised while building, running, or decoding a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy architecture needs at least an input and an output size")]
    EmptyArchitecture,
    #[error("layer {index} has zero-sized dimensions")]
    ZeroSizedLayer { index: usize },
    #[error("layer {index} is {inputs}->{outputs}, too large to address")]
    LayerTooLarge {
        index: usize,
        inputs: usize,
        outputs: usize,
    },
    #[error("input length {actual} does not match policy input size {expected}")]
    InputSize { expected: usize, actual: usize },
    #[error("action index {index} out of range for {actions} actions")]
    ActionIndex { index: usize, actions: usize },
    #[error("unsupported policy format version {found} (expected {expected})")]
    UnsupportedVersion { found: u16, expected: u16 },
    #[error("serialized policy declares {expected} layers but carries {actual}")]
    LayerCount { expected: usize, actual: usize },
    #[error(
        "layer {index} is {actual_inputs}->{actual_outputs} but the architecture requires {expected_inputs}->{expected_outputs}"
    )]
    ShapeMismatch {
        index: usize,
        expected_inputs: usize,
        expected_outputs: usize,
        actual_inputs: usize,
        actual_outputs: usize,
    },
    #[error("layer {index} carries {actual} {kind} but its shape requires {expected}")]
    ParameterCount {
        index: usize,
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("layer {index} contains a non-finite parameter")]
    NonFinite { index: usize },
    #[error("architecture {actual:?} is incompatible with expected {expected:?}")]
    ArchitectureMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("malformed policy data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fully connected layer: `weights` is row-major `[outputs][inputs]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DenseLayer {
    inputs: usize,
    outputs: usize,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DenseLayer {
    fn random(inputs: usize, outputs: usize, rng: &mut SimRng) -> Self {
        let weights = (0..inputs * outputs)
            .map(|_| rng.gaussian(0.0, INIT_STD_DEV))
            .collect();
        let biases = (0..outputs)
            .map(|_| rng.gaussian(0.0, INIT_STD_DEV))
            .collect();
        Self {
            inputs,
            outputs,
            weights,
            biases,
        }
    }

    #[must_use]
    pub const fn inputs(&self) -> usize {
        self.inputs
    }

    #[must_use]
    pub const fn outputs(&self) -> usize {
        self.outputs
    }

    #[must_use]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[must_use]
    pub fn biases(&self) -> &[f32] {
        &self.biases
    }

    /// Incoming weights of output unit `unit`.
    #[must_use]
    pub fn row(&self, unit: usize) -> &[f32] {
        &self.weights[unit * self.inputs..(unit + 1) * self.inputs]
    }

    fn params(&self) -> impl Iterator<Item = f32> + '_ {
        self.weights.iter().chain(self.biases.iter()).copied()
    }

    fn affine(&self, input: &[f32]) -> Vec<f32> {
        self.weights
            .par_chunks_exact(self.inputs)
            .zip(self.biases.par_iter())
            .map(|(row, bias)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f32>() + bias)
            .collect()
    }

    fn validate(&self, index: usize) -> Result<(), PolicyError> {
        if self.inputs == 0 || self.outputs == 0 {
            return Err(PolicyError::ZeroSizedLayer { index });
        }
        let expected = weight_count(index, self.inputs, self.outputs)?;
        if self.weights.len() != expected {
            return Err(PolicyError::ParameterCount {
                index,
                kind: "weights",
                expected,
                actual: self.weights.len(),
            });
        }
        if self.biases.len() != self.outputs {
            return Err(PolicyError::ParameterCount {
                index,
                kind: "biases",
                expected: self.outputs,
                actual: self.biases.len(),
            });
        }
        if !self.params().all(f32::is_finite) {
            return Err(PolicyError::NonFinite { index });
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct PolicyGenomeRef<'a> {
    version: u16,
    architecture: Vec<usize>,
    layers: &'a [DenseLayer],
}

#[derive(Deserialize)]
struct PolicyGenome {
    version: u16,
    architecture: Vec<usize>,
    layers: Vec<DenseLayer>,
}

/// Summary statistics over a pooled parameter set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ParameterStats {
    pub count: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub std_dev: f32,
    pub median: f32,
}

impl ParameterStats {
    fn from_values(mut values: Vec<f32>) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        values.sort_by_key(|v| OrderedFloat(*v));
        let count = values.len();
        let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / count as f64;
        let variance = values
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        let median = if count % 2 == 0 {
            (values[count / 2 - 1] + values[count / 2]) * 0.5
        } else {
            values[count / 2]
        };
        Self {
            count,
            min: values[0],
            max: values[count - 1],
            mean: mean as f32,
            std_dev: variance.sqrt() as f32,
            median,
        }
    }
}

/// Separate statistics for all weights and all biases.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct WeightStats {
    pub weights: ParameterStats,
    pub biases: ParameterStats,
}

/// Feedforward network with ReLU hidden layers and a softmax over the final logits.
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralPolicy {
    layers: Vec<DenseLayer>,
}

impl NeuralPolicy {
    /// Build a policy for `architecture` (`[inputs, hidden.., outputs]`) with Gaussian(0, 0.1)
    /// weights and biases.
    pub fn new(architecture: &[usize], rng: &mut SimRng) -> Result<Self, PolicyError> {
        validate_architecture(architecture)?;
        Ok(Self::build(architecture, rng))
    }

    /// Randomly initialised policy using [`DEFAULT_ARCHITECTURE`].
    #[must_use]
    pub fn random(rng: &mut SimRng) -> Self {
        Self::build(&DEFAULT_ARCHITECTURE, rng)
    }

    fn build(architecture: &[usize], rng: &mut SimRng) -> Self {
        let layers = architecture
            .windows(2)
            .map(|pair| DenseLayer::random(pair[0], pair[1], rng))
            .collect();
        Self { layers }
    }

    /// Layer sizes, input first.
    #[must_use]
    pub fn architecture(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.layers.len() + 1);
        if let Some(first) = self.layers.first() {
            sizes.push(first.inputs);
        }
        sizes.extend(self.layers.iter().map(|layer| layer.outputs));
        sizes
    }

    #[must_use]
    pub fn layers(&self) -> &[DenseLayer] {
        &self.layers
    }

    #[must_use]
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.inputs)
    }

    #[must_use]
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.outputs)
    }

    /// Total number of weights and biases.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.weights.len() + layer.biases.len())
            .sum()
    }

    /// Action probabilities for `input`; the result sums to one.
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, PolicyError> {
        let expected = self.input_size();
        if input.len() != expected {
            return Err(PolicyError::InputSize {
                expected,
                actual: input.len(),
            });
        }
        let hidden = self.layers.len().saturating_sub(1);
        let mut activations = input.to_vec();
        for (index, layer) in self.layers.iter().enumerate() {
            let mut next = layer.affine(&activations);
            if index < hidden {
                for value in &mut next {
                    *value = value.max(0.0);
                }
            }
            activations = next;
        }
        Ok(softmax(&activations))
    }

    /// Copy of this policy where every parameter independently, with probability `rate`,
    /// receives Gaussian(0, `strength`) noise.
    #[must_use]
    pub fn mutate(&self, rng: &mut SimRng, rate: f32, strength: f32) -> Self {
        self.mutate_counted(rng, rate, strength).0
    }

    /// Same as [`Self::mutate`], also reporting how many parameters changed.
    #[must_use]
    pub fn mutate_counted(&self, rng: &mut SimRng, rate: f32, strength: f32) -> (Self, usize) {
        let mut child = self.clone();
        let mut mutated = 0usize;
        for layer in &mut child.layers {
            for param in layer.weights.iter_mut().chain(layer.biases.iter_mut()) {
                if rng.unit() < rate {
                    *param += rng.gaussian(0.0, strength);
                    mutated += 1;
                }
            }
        }
        (child, mutated)
    }

    /// Reward-weighted adjustment of the output unit for `action_index` only.
    ///
    /// Adds `learning_rate * reward * input[i]` to each incoming weight of that unit and
    /// `learning_rate * reward` to its bias. Rewards below 0.01 in magnitude are ignored.
    ///
    /// `input[i]` pairs with incoming weight `i` of the output unit, so only the first
    /// `row width` values take part (the last hidden layer's width, 64 for
    /// [`DEFAULT_ARCHITECTURE`]). With agents this means the leading vision samples of the
    /// sensory vector. Missing trailing inputs count as zero.
    pub fn apply_output_nudge(
        &mut self,
        input: &[f32],
        action_index: usize,
        reward: f32,
        learning_rate: f32,
    ) -> Result<(), PolicyError> {
        if reward.abs() < NUDGE_EPSILON {
            return Ok(());
        }
        let Some(output) = self.layers.last_mut() else {
            return Ok(());
        };
        if action_index >= output.outputs {
            return Err(PolicyError::ActionIndex {
                index: action_index,
                actions: output.outputs,
            });
        }
        let step = learning_rate * reward;
        let start = action_index * output.inputs;
        let row = &mut output.weights[start..start + output.inputs];
        for (weight, x) in row.iter_mut().zip(input) {
            *weight += step * x;
        }
        output.biases[action_index] += step;
        Ok(())
    }

    /// JSON encoding carrying the format version, the architecture, and every parameter.
    pub fn serialize(&self) -> Result<String, PolicyError> {
        let genome = PolicyGenomeRef {
            version: POLICY_FORMAT_VERSION,
            architecture: self.architecture(),
            layers: &self.layers,
        };
        Ok(serde_json::to_string(&genome)?)
    }

    /// Decode a policy, rejecting anything whose shapes disagree with its declared architecture.
    pub fn deserialize(data: &str) -> Result<Self, PolicyError> {
        let genome: PolicyGenome = serde_json::from_str(data)?;
        if genome.version != POLICY_FORMAT_VERSION {
            return Err(PolicyError::UnsupportedVersion {
                found: genome.version,
                expected: POLICY_FORMAT_VERSION,
            });
        }
        validate_architecture(&genome.architecture)?;
        let expected_layers = genome.architecture.len() - 1;
        if genome.layers.len() != expected_layers {
            return Err(PolicyError::LayerCount {
                expected: expected_layers,
                actual: genome.layers.len(),
            });
        }
        for (index, (layer, pair)) in genome
            .layers
            .iter()
            .zip(genome.architecture.windows(2))
            .enumerate()
        {
            if layer.inputs != pair[0] || layer.outputs != pair[1] {
                return Err(PolicyError::ShapeMismatch {
                    index,
                    expected_inputs: pair[0],
                    expected_outputs: pair[1],
                    actual_inputs: layer.inputs,
                    actual_outputs: layer.outputs,
                });
            }
            layer.validate(index)?;
        }
        Ok(Self {
            layers: genome.layers,
        })
    }

    /// Decode a policy and require it to match `expected` exactly.
    pub fn deserialize_for(data: &str, expected: &[usize]) -> Result<Self, PolicyError> {
        let policy = Self::deserialize(data)?;
        let actual = policy.architecture();
        if actual != expected {
            return Err(PolicyError::ArchitectureMismatch {
                expected: expected.to_vec(),
                actual,
            });
        }
        Ok(policy)
    }

    /// `max(0, 1 - mean |a_i - b_i|)` over all parameters; 0 when architectures differ.
    #[must_use]
    pub fn similarity(&self, other: &Self) -> f32 {
        if self.layers.len() != other.layers.len() {
            return 0.0;
        }
        let mut total = 0.0_f64;
        let mut count = 0usize;
        for (a, b) in self.layers.iter().zip(&other.layers) {
            if a.inputs != b.inputs || a.outputs != b.outputs {
                return 0.0;
            }
            for (x, y) in a.params().zip(b.params()) {
                total += f64::from((x - y).abs());
                count += 1;
            }
        }
        if count == 0 {
            return 1.0;
        }
        (1.0 - (total / count as f64) as f32).max(0.0)
    }

    #[must_use]
    pub fn weight_stats(&self) -> WeightStats {
        let weights = self
            .layers
            .iter()
            .flat_map(|layer| layer.weights.iter().copied())
            .collect();
        let biases = self
            .layers
            .iter()
            .flat_map(|layer| layer.biases.iter().copied())
            .collect();
        WeightStats {
            weights: ParameterStats::from_values(weights),
            biases: ParameterStats::from_values(biases),
        }
    }
}

fn validate_architecture(architecture: &[usize]) -> Result<(), PolicyError> {
    if architecture.len() < 2 {
        return Err(PolicyError::EmptyArchitecture);
    }
    for (index, pair) in architecture.windows(2).enumerate() {
        if pair[0] == 0 || pair[1] == 0 {
            return Err(PolicyError::ZeroSizedLayer { index });
        }
        weight_count(index, pair[0], pair[1])?;
    }
    Ok(())
}

fn weight_count(index: usize, inputs: usize, outputs: usize) -> Result<usize, PolicyError> {
    inputs
        .checked_mul(outputs)
        .ok_or(PolicyError::LayerTooLarge {
            index,
            inputs,
            outputs,
        })
}

/// Softmax with the maximum logit subtracted first.
#[must_use]
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_policy(seed: u64) -> NeuralPolicy {
        let mut rng = SimRng::seed_from_u64(seed);
        NeuralPolicy::new(&[6, 4, 3], &mut rng).expect("valid architecture")
    }

    #[test]
    fn default_policy_has_expected_structure() {
        let mut rng = SimRng::seed_from_u64(0xDEADBEEF);
        let policy = NeuralPolicy::random(&mut rng);
        assert_eq!(policy.architecture(), DEFAULT_ARCHITECTURE.to_vec());
        assert_eq!(policy.layers().len(), 4);
        assert_eq!(
            policy.parameter_count(),
            542 * 256 + 256 + 256 * 128 + 128 + 128 * 64 + 64 + 64 * 5 + 5
        );
    }

    #[test]
    fn construction_rejects_bad_architectures() {
        let mut rng = SimRng::seed_from_u64(1);
        assert!(matches!(
            NeuralPolicy::new(&[4], &mut rng),
            Err(PolicyError::EmptyArchitecture)
        ));
        assert!(matches!(
            NeuralPolicy::new(&[4, 0, 2], &mut rng),
            Err(PolicyError::ZeroSizedLayer { index: 0 })
        ));
    }

    #[test]
    fn initial_parameters_follow_small_gaussian() {
        let mut rng = SimRng::seed_from_u64(99);
        let policy = NeuralPolicy::random(&mut rng);
        let stats = policy.weight_stats();
        assert!(stats.weights.mean.abs() < 0.01);
        assert!((stats.weights.std_dev - 0.1).abs() < 0.01);
        assert_eq!(stats.biases.count, 256 + 128 + 64 + 5);
    }

    #[test]
    fn forward_produces_distribution() {
        let policy = small_policy(3);
        let probs = policy.forward(&[0.5, -1.0, 2.0, 0.0, 1.0, 3.0]).expect("forward");
        assert_eq!(probs.len(), 3);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs.iter().all(|p| *p >= 0.0));
    }

    #[test]
    fn forward_rejects_wrong_input_length() {
        let policy = small_policy(3);
        assert!(matches!(
            policy.forward(&[1.0, 2.0]),
            Err(PolicyError::InputSize {
                expected: 6,
                actual: 2
            })
        ));
    }

    #[test]
    fn softmax_is_stable_for_large_logits() {
        let probs = softmax(&[1000.0, 1000.0, -1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!((probs[1] - 0.5).abs() < 1e-6);
        assert!(probs[2] < 1e-6);
    }

    #[test]
    fn zero_rate_mutation_is_identical() {
        let policy = small_policy(5);
        let mut rng = SimRng::seed_from_u64(6);
        let (child, mutated) = policy.mutate_counted(&mut rng, 0.0, 0.5);
        assert_eq!(mutated, 0);
        assert_eq!(child, policy);
        assert_eq!(policy.similarity(&child), 1.0);
    }

    #[test]
    fn full_rate_mutation_touches_every_parameter() {
        let policy = small_policy(5);
        let mut rng = SimRng::seed_from_u64(6);
        let (child, mutated) = policy.mutate_counted(&mut rng, 1.0, 0.5);
        assert_eq!(mutated, policy.parameter_count());
        assert!(policy.similarity(&child) < 1.0);
        // the parent is untouched
        assert_eq!(policy, small_policy(5));
    }

    #[test]
    fn nudge_moves_only_the_acted_unit() {
        let mut policy = small_policy(8);
        let before = policy.clone();
        let input = [1.0, 0.5, 0.0, -1.0, 2.0, 0.25];
        policy
            .apply_output_nudge(&input, 1, 0.5, 0.1)
            .expect("nudge");
        let out_before = before.layers().last().expect("layer");
        let out_after = policy.layers().last().expect("layer");
        for (i, (after, prior)) in out_after.row(1).iter().zip(out_before.row(1)).enumerate() {
            assert!((after - prior - 0.05 * input[i]).abs() < 1e-6);
        }
        assert!((out_after.biases()[1] - out_before.biases()[1] - 0.05).abs() < 1e-6);
        assert_eq!(out_after.row(0), out_before.row(0));
        assert_eq!(out_after.row(2), out_before.row(2));
        assert_eq!(policy.layers()[0], before.layers()[0]);
    }

    #[test]
    fn negligible_reward_is_ignored() {
        let mut policy = small_policy(8);
        let before = policy.clone();
        policy
            .apply_output_nudge(&[1.0; 6], 0, 0.005, 1.0)
            .expect("nudge");
        assert_eq!(policy, before);
    }

    #[test]
    fn nudge_rejects_unknown_action() {
        let mut policy = small_policy(8);
        assert!(matches!(
            policy.apply_output_nudge(&[1.0; 6], 7, 1.0, 0.1),
            Err(PolicyError::ActionIndex {
                index: 7,
                actions: 3
            })
        ));
    }

    #[test]
    fn serialization_round_trips() {
        let policy = small_policy(21);
        let encoded = policy.serialize().expect("serialize");
        let decoded = NeuralPolicy::deserialize(&encoded).expect("deserialize");
        assert_eq!(decoded, policy);
        assert_eq!(decoded.architecture(), vec![6, 4, 3]);
    }

    #[test]
    fn deserialize_rejects_shape_mismatch() {
        let policy = small_policy(21);
        let mut value: serde_json::Value =
            serde_json::from_str(&policy.serialize().expect("serialize")).expect("json");
        value["architecture"] = serde_json::json!([6, 5, 3]);
        let err = NeuralPolicy::deserialize(&value.to_string()).expect_err("mismatch");
        assert!(matches!(err, PolicyError::ShapeMismatch { index: 0, .. }));
    }

    #[test]
    fn deserialize_rejects_truncated_parameters() {
        let policy = small_policy(21);
        let mut value: serde_json::Value =
            serde_json::from_str(&policy.serialize().expect("serialize")).expect("json");
        value["layers"][1]["weights"]
            .as_array_mut()
            .expect("weights array")
            .pop();
        let err = NeuralPolicy::deserialize(&value.to_string()).expect_err("truncated");
        assert!(matches!(
            err,
            PolicyError::ParameterCount {
                index: 1,
                kind: "weights",
                ..
            }
        ));
    }

    #[test]
    fn deserialize_rejects_overflowing_layer_shape() {
        let huge = 1usize << (usize::BITS - 2);
        let data = serde_json::json!({
            "version": POLICY_FORMAT_VERSION,
            "architecture": [huge, 4],
            "layers": [{
                "inputs": huge,
                "outputs": 4,
                "weights": [],
                "biases": [0.0, 0.0, 0.0, 0.0],
            }],
        })
        .to_string();
        let err = NeuralPolicy::deserialize(&data).expect_err("overflow");
        assert!(matches!(
            err,
            PolicyError::LayerTooLarge {
                index: 0,
                outputs: 4,
                ..
            }
        ));
        let mut rng = SimRng::seed_from_u64(3);
        assert!(matches!(
            NeuralPolicy::new(&[huge, 4], &mut rng),
            Err(PolicyError::LayerTooLarge { .. })
        ));
    }

    #[test]
    fn deserialize_rejects_malformed_json_and_versions() {
        assert!(matches!(
            NeuralPolicy::deserialize("{not json"),
            Err(PolicyError::Json(_))
        ));
        let policy = small_policy(2);
        let mut value: serde_json::Value =
            serde_json::from_str(&policy.serialize().expect("serialize")).expect("json");
        value["version"] = serde_json::json!(99);
        assert!(matches!(
            NeuralPolicy::deserialize(&value.to_string()),
            Err(PolicyError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn deserialize_for_checks_expected_architecture() {
        let policy = small_policy(2);
        let encoded = policy.serialize().expect("serialize");
        assert!(NeuralPolicy::deserialize_for(&encoded, &[6, 4, 3]).is_ok());
        assert!(matches!(
            NeuralPolicy::deserialize_for(&encoded, &DEFAULT_ARCHITECTURE),
            Err(PolicyError::ArchitectureMismatch { .. })
        ));
    }

    #[test]
    fn similarity_is_zero_across_architectures() {
        let a = small_policy(1);
        let mut rng = SimRng::seed_from_u64(1);
        let b = NeuralPolicy::new(&[6, 3], &mut rng).expect("policy");
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn stats_report_median_and_extremes() {
        let stats = ParameterStats::from_values(vec![3.0, -1.0, 2.0, 10.0]);
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min, -1.0);
        assert_eq!(stats.max, 10.0);
        assert!((stats.median - 2.5).abs() < 1e-6);
        assert!((stats.mean - 3.5).abs() < 1e-6);
        assert_eq!(ParameterStats::from_values(Vec::new()), ParameterStats::default());
    }
}
