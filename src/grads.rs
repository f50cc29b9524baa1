//! Gradient accumulation for cell parameters.
//!
//! The reverse pass writes parameter gradients into a [`GradientBuffer`]
//! keyed by the parameter's [`ParamId`]. Every accumulation goes through
//! `&mut self`, so two backward passes can never write the same buffer at
//! once; workers that run in parallel keep their own buffer and fold them
//! together with [`GradientBuffer::merge`] afterwards.

use std::collections::HashMap;

use burn::module::{Param, ParamId};
use burn::tensor::{backend::Backend, Tensor};

use crate::error::{Result, RwaError};

#[derive(Debug, Clone)]
pub struct GradientBuffer<B: Backend> {
    grads: HashMap<ParamId, Tensor<B, 2>>,
}

impl<B: Backend> Default for GradientBuffer<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> GradientBuffer<B> {
    pub fn new() -> Self {
        Self {
            grads: HashMap::new(),
        }
    }

    /// Adds `grad` to the gradient stored for `param`.
    pub fn accumulate(&mut self, param: &Param<Tensor<B, 2>>, grad: Tensor<B, 2>) -> Result<()> {
        let expected = param.val().dims();
        let got = grad.dims();
        if expected != got {
            return Err(RwaError::shape("parameter gradient", &expected, &got));
        }

        let entry = match self.grads.remove(&param.id) {
            Some(existing) => existing + grad,
            None => grad,
        };
        self.grads.insert(param.id.clone(), entry);
        Ok(())
    }

    pub fn get(&self, param: &Param<Tensor<B, 2>>) -> Option<&Tensor<B, 2>> {
        self.grads.get(&param.id)
    }

    /// Removes and returns the gradient for `param`.
    pub fn remove(&mut self, param: &Param<Tensor<B, 2>>) -> Option<Tensor<B, 2>> {
        self.grads.remove(&param.id)
    }

    /// Sums another buffer into this one.
    pub fn merge(&mut self, other: GradientBuffer<B>) {
        for (id, grad) in other.grads {
            let entry = match self.grads.remove(&id) {
                Some(existing) => existing + grad,
                None => grad,
            };
            self.grads.insert(id, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    pub fn clear(&mut self) {
        self.grads.clear();
    }
}
