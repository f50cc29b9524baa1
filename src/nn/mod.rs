//! Differentiable building blocks used inside the cell.
//!
//! Both blocks are plain burn modules with a hand-written reverse pass:
//! `forward` computes the output from its inputs, `backward` takes the same
//! inputs plus the output gradient, accumulates parameter gradients into a
//! [`GradientBuffer`](crate::grads::GradientBuffer) and returns the input
//! gradients.
//!
//! | Block | Forward |
//! |-------|---------|
//! | [`Affine`] | `x·Wᵀ + b` |
//! | [`Mixer`] | `a·W1ᵀ + b1 + h·W2ᵀ + b2 [+ bias]` |
//!
//! Weights are stored `[out, in]`, biases `[1, out]`.

pub mod affine;
pub mod mixer;

pub use affine::Affine;
pub use mixer::Mixer;
