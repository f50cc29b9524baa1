//! Squashing functions for the RWA hidden state.
//!
//! The cell keeps its running average unsquashed and applies a squash on
//! the way out (and before feeding the average back into its gates). The
//! reverse pass only has the squashed values at hand, so every squash
//! exposes its derivative in terms of its own output.

use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

/// Elementwise squash applied to the running average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Squash {
    /// `tanh(x)`
    Tanh,
    /// LeCun's scaled tanh, `1.7159 * tanh(0.666 * x)`
    LeCun,
}

impl Squash {
    pub fn forward<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Squash::Tanh => x.tanh(),
            Squash::LeCun => LeCun::forward(x),
        }
    }

    /// Derivative of the squash, given its output `y`.
    pub fn derivative<B: Backend, const D: usize>(self, y: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Squash::Tanh => tanh_derivative(y),
            Squash::LeCun => LeCun::derivative(y),
        }
    }
}

/// `1 - y²` for `y = tanh(x)`.
pub fn tanh_derivative<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
    y.powf_scalar(2.0).neg().add_scalar(1.0)
}

/// LeCun's tanh activation function.
///
/// This activation function is defined as:
/// `f(x) = 1.7159 * tanh(0.666 * x)`
///
/// The scaling factors are chosen so the function is close to the identity
/// near the origin, with an output range of about `[-1.7159, 1.7159]`.
///
/// # Example
///
/// ```rust
/// use burn::backend::NdArray;
/// use burn::tensor::Tensor;
/// use rwa::activation::LeCun;
///
/// type Backend = NdArray<f32>;
/// let device = Default::default();
///
/// let x = Tensor::<Backend, 1>::from_floats([0.0, 1.0, -1.0], &device);
/// let y = LeCun::forward(x);
/// ```
pub struct LeCun;

impl LeCun {
    const SCALE: f32 = 1.7159;
    const SLOPE: f32 = 0.666;

    pub fn forward<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
        x.mul_scalar(Self::SLOPE).tanh().mul_scalar(Self::SCALE)
    }

    /// Derivative given the output `y`: `slope * scale * (1 - (y / scale)²)`.
    pub fn derivative<B: Backend, const D: usize>(y: Tensor<B, D>) -> Tensor<B, D> {
        tanh_derivative(y.div_scalar(Self::SCALE)).mul_scalar(Self::SLOPE * Self::SCALE)
    }
}
