//! Recurrent state of an RWA cell and its gradient.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use super::block::{RecurrentState, StateGradient};
use crate::error::{ensure_dims, Result, RwaError};
use crate::present::PresentMask;

/// State of an RWA cell between two timesteps.
///
/// The running numerator and denominator both begin at zero. `hidden` is
/// the previous *unsquashed* average; it is kept apart from the running
/// sums so the very first step has something to feed the gates with.
///
/// In the stabilized mode the sums are stored relative to
/// `exp(max_log_weight)`. Only their ratio is ever read, so the common
/// factor cancels.
#[derive(Debug, Clone)]
pub struct RwaState<B: Backend> {
    pub(crate) present: PresentMask,
    pub(crate) hidden: Tensor<B, 2>,
    pub(crate) numerator: Tensor<B, 2>,
    pub(crate) denominator: Tensor<B, 2>,
    pub(crate) max_log_weight: Option<Tensor<B, 2>>,
    pub(crate) first_step: bool,
}

impl<B: Backend> RwaState<B> {
    /// Unsquashed running average, `[active_batch, hidden_size]`.
    pub fn hidden(&self) -> &Tensor<B, 2> {
        &self.hidden
    }

    pub fn numerator(&self) -> &Tensor<B, 2> {
        &self.numerator
    }

    pub fn denominator(&self) -> &Tensor<B, 2> {
        &self.denominator
    }

    /// Running maximum log-weight. `None` for naive-mode states.
    pub fn max_log_weight(&self) -> Option<&Tensor<B, 2>> {
        self.max_log_weight.as_ref()
    }

    /// True only for a state that has not been stepped yet.
    pub fn is_first_step(&self) -> bool {
        self.first_step
    }

    pub fn batch_size(&self) -> usize {
        self.present.num_present()
    }

    /// Same state, with the log-domain reference point moved by `shift`.
    ///
    /// The running maximum grows by `shift` and both sums shrink by
    /// `exp(-shift)`, so the represented average is unchanged.
    pub fn rebased(&self, shift: f32) -> Result<Self> {
        let max_log_weight = self.max_log_weight.clone().ok_or_else(|| {
            RwaError::invariant("only stabilized states carry a log-domain reference point")
        })?;
        let scale = (-shift).exp();

        Ok(Self {
            present: self.present.clone(),
            hidden: self.hidden.clone(),
            numerator: self.numerator.clone().mul_scalar(scale),
            denominator: self.denominator.clone().mul_scalar(scale),
            max_log_weight: Some(max_log_weight.add_scalar(shift)),
            first_step: self.first_step,
        })
    }
}

impl<B: Backend> RecurrentState for RwaState<B> {
    fn present(&self) -> &PresentMask {
        &self.present
    }

    fn reduce(&self, present: &PresentMask) -> Result<Self> {
        let from = &self.present;
        let max_log_weight = match &self.max_log_weight {
            Some(m) => Some(from.reduce_rows(m.clone(), present)?),
            None => None,
        };

        Ok(Self {
            present: present.clone(),
            hidden: from.reduce_rows(self.hidden.clone(), present)?,
            numerator: from.reduce_rows(self.numerator.clone(), present)?,
            denominator: from.reduce_rows(self.denominator.clone(), present)?,
            max_log_weight,
            first_step: self.first_step,
        })
    }
}

/// Gradient of an [`RwaState`].
///
/// There is no entry for the running maximum: the cell's outputs do not
/// depend on where the log-domain reference point sits, so the reverse
/// pass treats it as a constant.
#[derive(Debug, Clone)]
pub struct RwaStateGrad<B: Backend> {
    pub(crate) present: PresentMask,
    pub(crate) hidden: Tensor<B, 2>,
    pub(crate) numerator: Tensor<B, 2>,
    pub(crate) denominator: Tensor<B, 2>,
}

impl<B: Backend> RwaStateGrad<B> {
    pub fn new(
        present: PresentMask,
        hidden: Tensor<B, 2>,
        numerator: Tensor<B, 2>,
        denominator: Tensor<B, 2>,
    ) -> Result<Self> {
        let [_, width] = hidden.dims();
        let shape = [present.num_present(), width];
        ensure_dims("hidden gradient", &hidden, shape)?;
        ensure_dims("numerator gradient", &numerator, shape)?;
        ensure_dims("denominator gradient", &denominator, shape)?;

        Ok(Self {
            present,
            hidden,
            numerator,
            denominator,
        })
    }

    /// All-zero gradient shaped like `state`.
    pub fn zeros_like(state: &RwaState<B>) -> Self {
        let dims = state.hidden.dims();
        let device = state.hidden.device();
        Self {
            present: state.present.clone(),
            hidden: Tensor::zeros(dims, &device),
            numerator: Tensor::zeros(dims, &device),
            denominator: Tensor::zeros(dims, &device),
        }
    }

    pub fn hidden(&self) -> &Tensor<B, 2> {
        &self.hidden
    }

    pub fn numerator(&self) -> &Tensor<B, 2> {
        &self.numerator
    }

    pub fn denominator(&self) -> &Tensor<B, 2> {
        &self.denominator
    }
}

impl<B: Backend> StateGradient for RwaStateGrad<B> {
    fn present(&self) -> &PresentMask {
        &self.present
    }

    fn expand(self, present: &PresentMask) -> Result<Self> {
        let from = &self.present;
        Ok(Self {
            hidden: from.expand_rows(self.hidden, present)?,
            numerator: from.expand_rows(self.numerator, present)?,
            denominator: from.expand_rows(self.denominator, present)?,
            present: present.clone(),
        })
    }
}
