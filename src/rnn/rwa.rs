//! Recurrent Weighted Average (RWA) RNN Layer
//!
//! Sequence-level wrapper around [`RwaCell`] for dense 3D input, where every
//! batch entry has the same length.

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::mapper::{SeqBatch, SequenceMapper};
use crate::cells::{RwaCell, RwaConfig, RwaState};
use crate::error::{Result, RwaError};

/// RWA RNN Layer
///
/// Processes `[batch, seq, features]` (or `[seq, batch, features]`) input
/// with an [`RwaCell`], optionally continuing from a previous state.
///
/// # Type Parameters
/// * `B` - The backend type
#[derive(Module, Debug)]
pub struct Rwa<B: Backend> {
    cell: RwaCell<B>,
    /// Whether input is batch-first
    batch_first: bool,
    /// Whether to return full sequence or just last timestep
    return_sequences: bool,
}

impl<B: Backend> Rwa<B> {
    /// Create a stabilized RWA layer
    ///
    /// # Arguments
    /// * `input_size` - Number of input features
    /// * `hidden_size` - Number of hidden units
    /// * `device` - Device to create the module on
    pub fn new(input_size: usize, hidden_size: usize, device: &B::Device) -> Self {
        Self::from_cell(RwaCell::new(input_size, hidden_size, device))
    }

    pub fn from_config(config: &RwaConfig, device: &B::Device) -> Self {
        Self::from_cell(config.init(device))
    }

    pub fn from_cell(cell: RwaCell<B>) -> Self {
        Self {
            cell,
            batch_first: true,
            return_sequences: true,
        }
    }

    /// Set whether input is batch-first (default: true)
    pub fn with_batch_first(mut self, batch_first: bool) -> Self {
        self.batch_first = batch_first;
        self
    }

    /// Set whether to return full sequences (default: true)
    pub fn with_return_sequences(mut self, return_sequences: bool) -> Self {
        self.return_sequences = return_sequences;
        self
    }

    pub fn cell(&self) -> &RwaCell<B> {
        &self.cell
    }

    pub fn input_size(&self) -> usize {
        self.cell.input_size()
    }

    pub fn hidden_size(&self) -> usize {
        self.cell.hidden_size()
    }

    /// Forward pass through the layer
    ///
    /// # Arguments
    /// * `input` - Input tensor of shape:
    ///   - `[batch, seq, features]` if batch_first=true
    ///   - `[seq, batch, features]` if batch_first=false
    /// * `state` - Optional state to continue from; a fresh
    ///   [`start`](RwaCell::start) state otherwise
    ///
    /// # Returns
    /// Tuple of (output, final_state) where output is
    /// `[batch, seq, hidden_size]`, or `[batch, 1, hidden_size]` when
    /// return_sequences=false.
    pub fn forward(
        &self,
        input: Tensor<B, 3>,
        state: Option<RwaState<B>>,
    ) -> Result<(Tensor<B, 3>, RwaState<B>)> {
        let dims = input.dims();
        let (batch_size, seq_len, time_dim) = if self.batch_first {
            (dims[0], dims[1], 1)
        } else {
            (dims[1], dims[0], 0)
        };
        if seq_len == 0 {
            return Err(RwaError::invariant("cannot run an empty sequence"));
        }

        let seq: Vec<SeqBatch<B>> = (0..seq_len)
            .map(|t| {
                let step_input = input.clone().narrow(time_dim, t, 1).squeeze(time_dim);
                SeqBatch::dense(step_input)
            })
            .collect();

        let initial = state.unwrap_or_else(|| self.cell.start(batch_size));
        let mapped = SequenceMapper::new().map_from(&self.cell, initial, &seq)?;
        let final_state = mapped.final_state().clone();

        let outputs: Vec<Tensor<B, 2>> = mapped
            .into_outputs()
            .into_iter()
            .map(|out| out.packed)
            .collect();
        let outputs = if self.return_sequences {
            outputs
        } else {
            outputs.into_iter().last().into_iter().collect()
        };

        Ok((Tensor::stack(outputs, 1), final_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::RwaMode;
    use burn::backend::NdArray;
    use burn::tensor::backend::Backend as BurnBackend;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;
    type TestDevice = <TestBackend as BurnBackend>::Device;

    fn get_test_device() -> TestDevice {
        Default::default()
    }

    #[test]
    fn test_rwa_rnn_creation() {
        let device = get_test_device();
        let rwa = Rwa::<TestBackend>::new(20, 50, &device);

        assert_eq!(rwa.input_size(), 20);
        assert_eq!(rwa.hidden_size(), 50);
    }

    #[test]
    fn test_rwa_rnn_forward() {
        let device = get_test_device();
        let rwa = Rwa::<TestBackend>::new(20, 50, &device);

        let input = Tensor::<TestBackend, 3>::zeros([4, 10, 20], &device);
        let (output, state) = rwa.forward(input, None).unwrap();

        assert_eq!(output.dims(), [4, 10, 50]);
        assert_eq!(state.hidden().dims(), [4, 50]);
    }

    #[test]
    fn test_rwa_rnn_return_last_only() {
        let device = get_test_device();
        let rwa = Rwa::<TestBackend>::new(20, 50, &device).with_return_sequences(false);

        let input = Tensor::<TestBackend, 3>::zeros([4, 10, 20], &device);
        let (output, _) = rwa.forward(input, None).unwrap();

        assert_eq!(output.dims(), [4, 1, 50]);
    }

    #[test]
    fn test_rwa_rnn_seq_first() {
        let device = get_test_device();
        let rwa = Rwa::<TestBackend>::new(20, 50, &device).with_batch_first(false);

        // [seq, batch, features]
        let input = Tensor::<TestBackend, 3>::zeros([10, 4, 20], &device);
        let (output, state) = rwa.forward(input, None).unwrap();

        assert_eq!(output.dims(), [4, 10, 50]);
        assert_eq!(state.batch_size(), 4);
    }

    #[test]
    fn test_rwa_rnn_continues_from_state() {
        let device = get_test_device();
        let config = RwaConfig::new(3, 4).with_mode(RwaMode::Naive);
        let rwa = Rwa::<TestBackend>::from_config(&config, &device);

        let input =
            Tensor::<TestBackend, 3>::random([2, 6, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let (whole, _) = rwa.forward(input.clone(), None).unwrap();

        let (_, state) = rwa.forward(input.clone().narrow(1, 0, 3), None).unwrap();
        let (tail, _) = rwa.forward(input.narrow(1, 3, 3), Some(state)).unwrap();

        let diff: f32 = (whole.narrow(1, 3, 3) - tail).abs().max().into_scalar();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_rwa_rnn_rejects_wrong_state_batch() {
        let device = get_test_device();
        let rwa = Rwa::<TestBackend>::new(3, 2, &device);

        let input = Tensor::<TestBackend, 3>::zeros([4, 2, 3], &device);
        let state = rwa.cell().start(2);
        assert!(rwa.forward(input, Some(state)).is_err());
    }
}
