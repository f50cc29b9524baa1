use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::prelude::*;

use crate::error::{ensure_dims, Result};
use crate::grads::GradientBuffer;

/// Fully-connected transform `y = x·Wᵀ + b`.
///
/// `weight` is `[output_size, input_size]` so its row-major flattening lists
/// one output unit's weights after another.
#[derive(Module, Debug)]
pub struct Affine<B: Backend> {
    input_size: usize,
    output_size: usize,
    weight: Param<Tensor<B, 2>>,
    bias: Option<Param<Tensor<B, 2>>>,
}

impl<B: Backend> Affine<B> {
    /// Create an affine transform with weights drawn uniformly from
    /// `±1/sqrt(input_size)` and zero biases.
    pub fn new(
        input_size: usize,
        output_size: usize,
        with_bias: bool,
        rng: &mut StdRng,
        device: &B::Device,
    ) -> Self {
        let bound = 1.0 / (input_size.max(1) as f32).sqrt();
        let values: Vec<f32> = (0..input_size * output_size)
            .map(|_| rng.gen_range(-bound..=bound))
            .collect();
        let weight = Tensor::from_data(TensorData::new(values, [output_size, input_size]), device);

        let bias = with_bias.then(|| Param::from_tensor(Tensor::zeros([1, output_size], device)));

        Self {
            input_size,
            output_size,
            weight: Param::from_tensor(weight),
            bias,
        }
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Multiplies the weights by `scale`, leaving the bias alone.
    pub fn scale_weights(mut self, scale: f32) -> Self {
        self.weight = self.weight.map(|w| w.mul_scalar(scale));
        self
    }

    /// Ordered parameter list: weight, then bias if present.
    pub fn parameters(&self) -> Vec<&Param<Tensor<B, 2>>> {
        let mut params = vec![&self.weight];
        params.extend(self.bias.as_ref());
        params
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Param<Tensor<B, 2>>> {
        let mut params = vec![&mut self.weight];
        params.extend(self.bias.as_mut());
        params
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let out = x.matmul(self.weight.val().transpose());
        match &self.bias {
            Some(bias) => out + bias.val(),
            None => out,
        }
    }

    /// Reverse pass for `forward(x)`. Accumulates `dW = dyᵀ·x` and
    /// `db = Σ_rows dy`, and returns `dx = dy·W`.
    pub fn backward(
        &self,
        x: Tensor<B, 2>,
        grad_out: Tensor<B, 2>,
        grads: &mut GradientBuffer<B>,
    ) -> Result<Tensor<B, 2>> {
        let [rows, _] = x.dims();
        ensure_dims("affine input", &x, [rows, self.input_size])?;
        ensure_dims("affine output gradient", &grad_out, [rows, self.output_size])?;

        grads.accumulate(&self.weight, grad_out.clone().transpose().matmul(x))?;
        if let Some(bias) = &self.bias {
            grads.accumulate(bias, grad_out.clone().sum_dim(0))?;
        }

        Ok(grad_out.matmul(self.weight.val()))
    }
}
