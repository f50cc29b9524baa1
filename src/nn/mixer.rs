use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::rngs::StdRng;

use super::Affine;
use crate::error::{ensure_dims, Result};
use crate::grads::GradientBuffer;

/// Two-input combinator: `in1(a) + in2(b) [+ bias]`.
///
/// The RWA cell uses one mixer per gate, feeding it the current input as
/// `a` and the squashed previous average as `b`. Any activation on top of
/// the mix is applied by the caller.
#[derive(Module, Debug)]
pub struct Mixer<B: Backend> {
    in1: Affine<B>,
    in2: Affine<B>,
    bias: Option<Param<Tensor<B, 2>>>,
}

impl<B: Backend> Mixer<B> {
    pub fn new(
        in1_size: usize,
        in2_size: usize,
        output_size: usize,
        with_bias: bool,
        rng: &mut StdRng,
        device: &B::Device,
    ) -> Self {
        let in1 = Affine::new(in1_size, output_size, true, rng, device);
        let in2 = Affine::new(in2_size, output_size, true, rng, device);
        let bias = with_bias.then(|| Param::from_tensor(Tensor::zeros([1, output_size], device)));

        Self { in1, in2, bias }
    }

    pub fn output_size(&self) -> usize {
        self.in1.output_size()
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Scale the weights of the first input's transform.
    pub fn scale_in1_weights(mut self, scale: f32) -> Self {
        self.in1 = self.in1.scale_weights(scale);
        self
    }

    /// `in1` parameters, then `in2` parameters, then the mixer bias.
    pub fn parameters(&self) -> Vec<&Param<Tensor<B, 2>>> {
        let mut params = self.in1.parameters();
        params.extend(self.in2.parameters());
        params.extend(self.bias.as_ref());
        params
    }

    pub(crate) fn parameters_mut(&mut self) -> Vec<&mut Param<Tensor<B, 2>>> {
        let mut params = self.in1.parameters_mut();
        params.extend(self.in2.parameters_mut());
        params.extend(self.bias.as_mut());
        params
    }

    pub fn forward(&self, a: Tensor<B, 2>, b: Tensor<B, 2>) -> Tensor<B, 2> {
        let mixed = self.in1.forward(a) + self.in2.forward(b);
        match &self.bias {
            Some(bias) => mixed + bias.val(),
            None => mixed,
        }
    }

    /// Reverse pass for `forward(a, b)`, returning `(da, db)`.
    pub fn backward(
        &self,
        a: Tensor<B, 2>,
        b: Tensor<B, 2>,
        grad_out: Tensor<B, 2>,
        grads: &mut GradientBuffer<B>,
    ) -> Result<(Tensor<B, 2>, Tensor<B, 2>)> {
        let [rows, _] = a.dims();
        ensure_dims("mixer output gradient", &grad_out, [rows, self.output_size()])?;

        if let Some(bias) = &self.bias {
            grads.accumulate(bias, grad_out.clone().sum_dim(0))?;
        }
        let grad_a = self.in1.backward(a, grad_out.clone(), grads)?;
        let grad_b = self.in2.backward(b, grad_out, grads)?;

        Ok((grad_a, grad_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn mixer(bias: bool) -> Mixer<TestBackend> {
        let mut rng = StdRng::seed_from_u64(3);
        Mixer::new(3, 2, 2, bias, &mut rng, &Default::default())
    }

    #[test]
    fn test_mixer_parameter_counts() {
        assert_eq!(mixer(false).parameters().len(), 4);
        assert_eq!(mixer(true).parameters().len(), 5);
        assert!(mixer(true).has_bias());
    }

    #[test]
    fn test_mixer_is_sum_of_parts() {
        let device = Default::default();
        let m = mixer(false);
        let a = Tensor::<TestBackend, 2>::ones([2, 3], &device);
        let b = Tensor::<TestBackend, 2>::ones([2, 2], &device);

        let mixed = m.forward(a.clone(), b.clone());
        let parts = m.in1.forward(a) + m.in2.forward(b);
        let diff = (mixed - parts).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_mixer_backward_shapes() {
        let device = Default::default();
        let m = mixer(true);
        let mut grads = GradientBuffer::new();

        let a = Tensor::<TestBackend, 2>::ones([4, 3], &device);
        let b = Tensor::<TestBackend, 2>::ones([4, 2], &device);
        let dy = Tensor::<TestBackend, 2>::ones([4, 2], &device);

        let (da, db) = m.backward(a, b, dy, &mut grads).unwrap();
        assert_eq!(da.dims(), [4, 3]);
        assert_eq!(db.dims(), [4, 2]);
        assert_eq!(grads.len(), 5);
    }
}
