//! Error types for the RWA cell and its sequence driver.

use burn::tensor::{backend::Backend, Tensor};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RwaError {
    /// Row or column counts of two tensors that must agree do not.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// A caller broke the forward/backward protocol.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// A tensor contains NaN or an infinity.
    #[error("Non-finite value in {what} at flat index {index}")]
    NumericDegenerate { what: String, index: usize },

    #[error("Parameter count mismatch: expected {expected}, got {got}")]
    ParameterCount { expected: usize, got: usize },

    /// The burn recorder failed to encode or decode a module record.
    #[error("Record error: {0}")]
    Record(String),
}

pub type Result<T> = std::result::Result<T, RwaError>;

impl RwaError {
    pub(crate) fn shape(what: impl Into<String>, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

/// Fails with [`RwaError::ShapeMismatch`] unless `tensor` has exactly `expected` dims.
pub fn ensure_dims<B: Backend>(
    what: &str,
    tensor: &Tensor<B, 2>,
    expected: [usize; 2],
) -> Result<()> {
    let got = tensor.dims();
    if got != expected {
        return Err(RwaError::shape(what, &expected, &got));
    }
    Ok(())
}

/// Fails with [`RwaError::NumericDegenerate`] at the first NaN or infinity.
///
/// This reads the tensor back to the host, so callers decide when it is worth it.
pub fn ensure_finite<B: Backend, const D: usize>(what: &str, tensor: &Tensor<B, D>) -> Result<()> {
    let data = tensor.to_data();
    let position = data.iter::<f64>().position(|v| !v.is_finite());
    match position {
        Some(index) => Err(RwaError::NumericDegenerate {
            what: what.to_string(),
            index,
        }),
        None => Ok(()),
    }
}
