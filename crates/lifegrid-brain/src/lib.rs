//! Action policies for LifeGrid agents.
//!
//! A [`NeuralPolicy`] is a fixed-topology feedforward network whose final layer is read as a
//! probability distribution over [`ACTION_COUNT`] moves. Policies evolve through
//! [`NeuralPolicy::mutate`] and adapt within a lifetime through
//! [`NeuralPolicy::apply_output_nudge`]. All randomness flows through an explicit [`SimRng`].

pub mod policy;
pub mod rng;

pub use policy::{
    ACTION_COUNT, DEFAULT_ARCHITECTURE, DenseLayer, NeuralPolicy, POLICY_FORMAT_VERSION,
    ParameterStats, PolicyError, SENSORY_INPUT_SIZE, WeightStats, softmax,
};
pub use rng::SimRng;
