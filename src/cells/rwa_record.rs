use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::present::PresentMask;

/// Everything the reverse pass of one RWA timestep needs.
///
/// Produced by [`RwaCell::step`](super::RwaCell::step) and consumed by value
/// by [`RwaCell::propagate`](super::RwaCell::propagate), which drops it on
/// return. All tensors are `[active_batch, width]` under `present`.
#[derive(Debug)]
pub struct RwaRecord<B: Backend> {
    pub(crate) present: PresentMask,
    /// `x`
    pub(crate) input: Tensor<B, 2>,
    /// `squash(hidden)` of the consumed state
    pub(crate) squashed_prev: Tensor<B, 2>,
    /// `exp(logWeight)`, or `exp(logWeight - newMax)` when stabilized
    pub(crate) weight: Tensor<B, 2>,
    /// `encoder(x)`
    pub(crate) encoded: Tensor<B, 2>,
    /// `tanh(masker(x, squashed_prev))`
    pub(crate) gate: Tensor<B, 2>,
    /// `encoded ⊙ gate`
    pub(crate) z: Tensor<B, 2>,
    /// Factor applied to the previous sums; `None` in naive mode.
    pub(crate) rescale: Option<Tensor<B, 2>>,
    /// `1 / denominator'`
    pub(crate) inv_denominator: Tensor<B, 2>,
    /// `numerator' / denominator'`
    pub(crate) unsquashed: Tensor<B, 2>,
    /// `squash(unsquashed)`
    pub(crate) output: Tensor<B, 2>,
}

impl<B: Backend> RwaRecord<B> {
    pub fn present(&self) -> &PresentMask {
        &self.present
    }

    pub fn batch_size(&self) -> usize {
        self.present.num_present()
    }
}
