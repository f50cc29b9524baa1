use burn::module::Param;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::error::Result;
use crate::grads::GradientBuffer;
use crate::present::PresentMask;

/// State carried between timesteps of a recurrent block.
pub trait RecurrentState: Sized + Clone {
    /// Mask the state's rows are laid out under.
    fn present(&self) -> &PresentMask;

    /// Drop the rows of slots that are inactive in `present`.
    fn reduce(&self, present: &PresentMask) -> Result<Self>;
}

/// Gradient of a [`RecurrentState`].
pub trait StateGradient: Sized {
    fn present(&self) -> &PresentMask;

    /// Re-insert zero rows for slots active in `present` but absent here.
    fn expand(self, present: &PresentMask) -> Result<Self>;
}

/// Result of one forward timestep.
#[derive(Debug)]
pub struct StepOutput<B: Backend, S, R> {
    /// `[active_batch, output_size]`
    pub output: Tensor<B, 2>,
    /// State to feed the next timestep.
    pub state: S,
    /// Intermediates for exactly one call to [`Block::propagate`].
    pub record: R,
}

/// A recurrent block that can be stepped forward and replayed backward.
///
/// The state, state gradient and forward record are associated types, so a
/// sequence driver written against this trait never needs to downcast.
pub trait Block<B: Backend> {
    type State: RecurrentState;
    type StateGrad: StateGradient;
    type Record;

    /// Initial state for `batch_size` slots, all of them active.
    fn start(&self, batch_size: usize) -> Self::State;

    /// Run one timestep. `input` must have one row per active slot of `state`.
    fn step(
        &self,
        state: &Self::State,
        input: Tensor<B, 2>,
    ) -> Result<StepOutput<B, Self::State, Self::Record>>;

    /// Reverse pass for one timestep.
    ///
    /// `next_grad` is the gradient of the state this step produced, `None`
    /// for the last step of a sequence. Returns the input gradient and the
    /// gradient of the state the step consumed.
    fn propagate(
        &self,
        record: Self::Record,
        output_grad: Tensor<B, 2>,
        next_grad: Option<Self::StateGrad>,
        grads: &mut GradientBuffer<B>,
    ) -> Result<(Tensor<B, 2>, Self::StateGrad)>;

    /// Fold the gradient of a state returned by [`Block::start`] into the
    /// parameters that produced it.
    fn propagate_start(&self, grad: &Self::StateGrad, grads: &mut GradientBuffer<B>)
        -> Result<()>;

    /// Trainable parameters in a fixed order.
    fn parameters(&self) -> Vec<&Param<Tensor<B, 2>>>;
}
