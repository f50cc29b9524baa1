//! Recurrent Weighted Average (RWA) Cell Implementation
//!
//! The RWA cell keeps a running average of transformed inputs, weighted by
//! a learned, input- and state-dependent attention term `exp(a(x, h))`:
//!
//! ```text
//! h̃   = squash(h)
//! a   = context(x, h̃)                 log-weight
//! z   = encoder(x) ⊙ tanh(masker(x, h̃))
//! n'  = n + z ⊙ exp(a)
//! d'  = d + exp(a)
//! h'  = n' / d'                        output: squash(h')
//! ```
//!
//! Two modes are supported:
//! - **Stabilized** (default): the sums are kept relative to the running
//!   maximum log-weight, so only values in `(0, 1]` are exponentiated
//! - **Naive**: the recurrence exactly as written above; overflows once
//!   `a` grows past the float range of `exp`

use burn::config::Config;
use burn::module::{Ignored, Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::block::{Block, StepOutput};
use super::rwa_record::RwaRecord;
use super::rwa_state::{RwaState, RwaStateGrad};
use crate::activation::{tanh_derivative, Squash};
use crate::error::{self, ensure_dims, RwaError};
use crate::grads::GradientBuffer;
use crate::nn::{Affine, Mixer};
use crate::present::PresentMask;

/// RWA operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RwaMode {
    /// Plain running sums of `exp(a)`. Mixers carry no extra bias, giving
    /// the 11-parameter layout of older saved models.
    Naive,
    /// Log-domain renormalized sums with biased mixers (13 parameters).
    Stabilized,
}

/// Configuration to create an [`RwaCell`].
#[derive(Config, Debug)]
pub struct RwaConfig {
    /// Number of input features.
    pub input_size: usize,
    /// Number of hidden units.
    pub hidden_size: usize,
    #[config(default = "RwaMode::Stabilized")]
    pub mode: RwaMode,
    /// Squash applied to the running average.
    #[config(default = "Squash::Tanh")]
    pub squash: Squash,
    /// Seed for the weight initialization.
    #[config(default = "0")]
    pub seed: u64,
    /// Factor applied to every weight matrix that reads the input.
    #[config(default = "1.0")]
    pub in_weight_scale: f32,
}

impl RwaConfig {
    /// Build a randomly initialized cell. The initial hidden value and all
    /// biases start at zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RwaCell<B> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mixer_bias = self.mode == RwaMode::Stabilized;
        let (input, hidden) = (self.input_size, self.hidden_size);

        let encoder = Affine::new(input, hidden, true, &mut rng, device)
            .scale_weights(self.in_weight_scale);
        let masker = Mixer::new(input, hidden, hidden, mixer_bias, &mut rng, device)
            .scale_in1_weights(self.in_weight_scale);
        let context = Mixer::new(input, hidden, hidden, mixer_bias, &mut rng, device)
            .scale_in1_weights(self.in_weight_scale);

        RwaCell {
            input_size: input,
            hidden_size: hidden,
            mode: Ignored(self.mode),
            squash: Ignored(self.squash),
            init: Param::from_tensor(Tensor::zeros([1, hidden], device)),
            encoder,
            masker,
            context,
        }
    }
}

/// A Recurrent Weighted Average cell
///
/// Processes one timestep per [`step`](RwaCell::step); see
/// [`crate::rnn::SequenceMapper`] for whole sequences.
///
/// # Type Parameters
/// * `B` - The backend type
#[derive(Module, Debug)]
pub struct RwaCell<B: Backend> {
    input_size: usize,
    hidden_size: usize,
    mode: Ignored<RwaMode>,
    squash: Ignored<Squash>,
    /// Unsquashed start state, `[1, hidden_size]`
    init: Param<Tensor<B, 2>>,
    /// u(x)
    encoder: Affine<B>,
    /// g(x, h)
    masker: Mixer<B>,
    /// a(x, h)
    context: Mixer<B>,
}

impl<B: Backend> RwaCell<B> {
    /// Create a stabilized cell with default settings.
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        RwaConfig::new(input_size, hidden_size).init(device)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn mode(&self) -> RwaMode {
        *self.mode
    }

    pub fn squash(&self) -> Squash {
        *self.squash
    }

    /// Configuration that rebuilds a cell of the same shape.
    pub fn config(&self) -> RwaConfig {
        RwaConfig::new(self.input_size, self.hidden_size)
            .with_mode(self.mode())
            .with_squash(self.squash())
    }

    fn device(&self) -> B::Device {
        self.init.val().device()
    }

    /// Parameters in their fixed order:
    ///
    /// `init, encoder.{w,b}, masker.in1.{w,b}, masker.in2.{w,b}, [masker.bias],
    /// context.in1.{w,b}, context.in2.{w,b}, [context.bias]`
    pub fn parameters(&self) -> Vec<&Param<Tensor<B, 2>>> {
        let mut params = vec![&self.init];
        params.extend(self.encoder.parameters());
        params.extend(self.masker.parameters());
        params.extend(self.context.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Param<Tensor<B, 2>>> {
        let mut params = vec![&mut self.init];
        params.extend(self.encoder.parameters_mut());
        params.extend(self.masker.parameters_mut());
        params.extend(self.context.parameters_mut());
        params
    }

    /// Flattened (row-major) values of every parameter, in parameter order.
    pub fn parameter_values(&self) -> Vec<Vec<f64>> {
        self.parameters()
            .into_iter()
            .map(|p| p.val().into_data().iter::<f64>().collect())
            .collect()
    }

    /// Replace every parameter with the given flattened values.
    ///
    /// Parameter identities are preserved, so gradient buffers keyed on the
    /// old parameters stay valid.
    pub fn load_parameters(mut self, values: &[Vec<f64>]) -> error::Result<Self> {
        let params = self.parameters_mut();
        if params.len() != values.len() {
            return Err(RwaError::ParameterCount {
                expected: params.len(),
                got: values.len(),
            });
        }

        for (index, (param, data)) in params.into_iter().zip(values).enumerate() {
            let tensor = param.val();
            let dims = tensor.dims();
            if dims[0] * dims[1] != data.len() {
                return Err(RwaError::shape(
                    format!("parameter {}", index),
                    &[dims[0] * dims[1]],
                    &[data.len()],
                ));
            }
            let device = tensor.device();
            let replacement = Tensor::from_data(TensorData::new(data.clone(), dims), &device);
            *param = param.clone().map(|_| replacement);
        }

        Ok(self)
    }

    /// Initial state for `batch_size` slots: `hidden = init` on every row,
    /// zero sums, running maximum at `-inf`.
    pub fn start(&self, batch_size: usize) -> RwaState<B> {
        let device = self.device();
        let shape = [batch_size, self.hidden_size];
        let max_log_weight = match self.mode() {
            RwaMode::Stabilized => Some(Tensor::full(shape, f32::NEG_INFINITY, &device)),
            RwaMode::Naive => None,
        };

        RwaState {
            present: PresentMask::full(batch_size),
            hidden: Tensor::zeros(shape, &device) + self.init.val(),
            numerator: Tensor::zeros(shape, &device),
            denominator: Tensor::zeros(shape, &device),
            max_log_weight,
            first_step: true,
        }
    }

    /// Perform one timestep.
    ///
    /// # Arguments
    /// * `state` - State produced by [`start`](Self::start) or a previous step
    /// * `input` - Input tensor of shape `[active_batch, input_size]`
    ///
    /// # Returns
    /// The squashed average `[active_batch, hidden_size]`, the next state and
    /// the record needed to propagate gradients through this step.
    pub fn step(
        &self,
        state: &RwaState<B>,
        input: Tensor<B, 2>,
    ) -> error::Result<StepOutput<B, RwaState<B>, RwaRecord<B>>> {
        let batch = state.batch_size();
        ensure_dims("step input", &input, [batch, self.input_size])?;
        ensure_dims("state hidden", &state.hidden, [batch, self.hidden_size])?;
        ensure_dims("state numerator", &state.numerator, [batch, self.hidden_size])?;
        ensure_dims("state denominator", &state.denominator, [batch, self.hidden_size])?;
        tracing::trace!(batch, first_step = state.first_step, mode = ?self.mode(), "rwa step");

        let squash = self.squash();
        let squashed_prev = squash.forward(state.hidden.clone());

        let log_weight = self.context.forward(input.clone(), squashed_prev.clone());
        let encoded = self.encoder.forward(input.clone());
        let gate = self
            .masker
            .forward(input.clone(), squashed_prev.clone())
            .tanh();
        let z = encoded.clone() * gate.clone();

        let (weight, rescale, max_log_weight) = match self.mode() {
            RwaMode::Naive => (log_weight.exp(), None, None),
            RwaMode::Stabilized => {
                let (new_max, rescale) = self.advance_max(state, log_weight.clone())?;
                let weight = (log_weight - new_max.clone()).exp();
                (weight, Some(rescale), Some(new_max))
            }
        };

        let (numerator, denominator) = match &rescale {
            Some(rescale) => (
                state.numerator.clone() * rescale.clone() + z.clone() * weight.clone(),
                state.denominator.clone() * rescale.clone() + weight.clone(),
            ),
            None => (
                state.numerator.clone() + z.clone() * weight.clone(),
                state.denominator.clone() + weight.clone(),
            ),
        };

        let inv_denominator = denominator.clone().recip();
        let unsquashed = numerator.clone() * inv_denominator.clone();
        let output = squash.forward(unsquashed.clone());

        let next = RwaState {
            present: state.present.clone(),
            hidden: unsquashed.clone(),
            numerator,
            denominator,
            max_log_weight,
            first_step: false,
        };

        let record = RwaRecord {
            present: state.present.clone(),
            input,
            squashed_prev,
            weight,
            encoded,
            gate,
            z,
            rescale,
            inv_denominator,
            unsquashed,
            output: output.clone(),
        };

        Ok(StepOutput {
            output,
            state: next,
            record,
        })
    }

    /// New running maximum and the factor that moves the old sums onto it.
    fn advance_max(
        &self,
        state: &RwaState<B>,
        log_weight: Tensor<B, 2>,
    ) -> error::Result<(Tensor<B, 2>, Tensor<B, 2>)> {
        if state.first_step {
            let rescale = log_weight.zeros_like();
            return Ok((log_weight, rescale));
        }

        let prev_max = state.max_log_weight.clone().ok_or_else(|| {
            RwaError::invariant("stabilized step received a state without a running maximum")
        })?;
        ensure_dims("state max log-weight", &prev_max, log_weight.dims())?;

        let new_max = log_weight.max_pair(prev_max.clone());
        let rescale = (prev_max - new_max.clone()).exp();
        Ok((new_max, rescale))
    }

    /// Reverse pass for one timestep.
    ///
    /// # Arguments
    /// * `record` - Record returned by the matching [`step`](Self::step)
    /// * `output_grad` - Gradient of the step's output
    /// * `next_grad` - Gradient of the state the step produced, `None` if
    ///   that state was never used
    /// * `grads` - Buffer receiving the parameter gradients
    ///
    /// # Returns
    /// Tuple of (input gradient, gradient of the state the step consumed)
    pub fn propagate(
        &self,
        record: RwaRecord<B>,
        output_grad: Tensor<B, 2>,
        next_grad: Option<RwaStateGrad<B>>,
        grads: &mut GradientBuffer<B>,
    ) -> error::Result<(Tensor<B, 2>, RwaStateGrad<B>)> {
        let shape = [record.batch_size(), self.hidden_size];
        ensure_dims("output gradient", &output_grad, shape)?;

        let device = output_grad.device();
        let (next_hidden, next_numerator, next_denominator) = match next_grad {
            Some(next) => {
                if next.present != record.present {
                    return Err(RwaError::invariant(format!(
                        "state gradient mask {:?} does not match the step's mask {:?}",
                        next.present.slots(),
                        record.present.slots()
                    )));
                }
                ensure_dims("hidden gradient", &next.hidden, shape)?;
                ensure_dims("numerator gradient", &next.numerator, shape)?;
                ensure_dims("denominator gradient", &next.denominator, shape)?;
                (next.hidden, next.numerator, next.denominator)
            }
            None => (
                Tensor::zeros(shape, &device),
                Tensor::zeros(shape, &device),
                Tensor::zeros(shape, &device),
            ),
        };

        let squash = self.squash();
        let RwaRecord {
            present,
            input,
            squashed_prev,
            weight,
            encoded,
            gate,
            z,
            rescale,
            inv_denominator,
            unsquashed,
            output,
        } = record;

        // h' = n' / d'
        let grad_unsquashed = next_hidden + output_grad * squash.derivative(output);
        let grad_numerator = next_numerator + grad_unsquashed.clone() * inv_denominator.clone();
        let grad_denominator = next_denominator - grad_unsquashed * unsquashed * inv_denominator;

        // n' = n·r + z·w, d' = d·r + w
        let (prev_numerator, prev_denominator) = match rescale {
            Some(rescale) => (
                grad_numerator.clone() * rescale.clone(),
                grad_denominator.clone() * rescale,
            ),
            None => (grad_numerator.clone(), grad_denominator.clone()),
        };
        let grad_z = grad_numerator.clone() * weight.clone();
        let grad_weight = grad_numerator * z + grad_denominator;
        let grad_log_weight = grad_weight * weight;

        // z = u ⊙ tanh(m)
        let grad_encoded = grad_z.clone() * gate.clone();
        let grad_masker = grad_z * encoded * tanh_derivative(gate);

        let grad_input = self.encoder.backward(input.clone(), grad_encoded, grads)?;
        let (masker_input, masker_hidden) =
            self.masker
                .backward(input.clone(), squashed_prev.clone(), grad_masker, grads)?;
        let (context_input, context_hidden) =
            self.context
                .backward(input, squashed_prev.clone(), grad_log_weight, grads)?;

        let grad_input = grad_input + masker_input + context_input;
        let grad_hidden = (masker_hidden + context_hidden) * squash.derivative(squashed_prev);

        Ok((
            grad_input,
            RwaStateGrad {
                present,
                hidden: grad_hidden,
                numerator: prev_numerator,
                denominator: prev_denominator,
            },
        ))
    }

    /// Accumulate the gradient of a start state into `init`.
    pub fn propagate_start(
        &self,
        grad: &RwaStateGrad<B>,
        grads: &mut GradientBuffer<B>,
    ) -> error::Result<()> {
        let [_, width] = grad.hidden.dims();
        if width != self.hidden_size {
            return Err(RwaError::shape(
                "start state gradient",
                &[grad.present.num_present(), self.hidden_size],
                &grad.hidden.dims(),
            ));
        }
        grads.accumulate(&self.init, grad.hidden.clone().sum_dim(0))
    }
}

impl<B: Backend> Block<B> for RwaCell<B> {
    type State = RwaState<B>;
    type StateGrad = RwaStateGrad<B>;
    type Record = RwaRecord<B>;

    fn start(&self, batch_size: usize) -> Self::State {
        RwaCell::start(self, batch_size)
    }

    fn step(
        &self,
        state: &Self::State,
        input: Tensor<B, 2>,
    ) -> error::Result<StepOutput<B, Self::State, Self::Record>> {
        RwaCell::step(self, state, input)
    }

    fn propagate(
        &self,
        record: Self::Record,
        output_grad: Tensor<B, 2>,
        next_grad: Option<Self::StateGrad>,
        grads: &mut GradientBuffer<B>,
    ) -> error::Result<(Tensor<B, 2>, Self::StateGrad)> {
        RwaCell::propagate(self, record, output_grad, next_grad, grads)
    }

    fn propagate_start(
        &self,
        grad: &Self::StateGrad,
        grads: &mut GradientBuffer<B>,
    ) -> error::Result<()> {
        RwaCell::propagate_start(self, grad, grads)
    }

    fn parameters(&self) -> Vec<&Param<Tensor<B, 2>>> {
        RwaCell::parameters(self)
    }
}
