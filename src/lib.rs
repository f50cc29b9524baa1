//! # RWA - Recurrent Weighted Average
//!
//! A Recurrent Weighted Average cell for the Burn framework, with an explicit
//! reverse pass and support for batches whose sequences end at different
//! times.
//!
//! ## Features
//!
//! - **Stabilized recurrence**: running sums kept relative to the running
//!   maximum log-weight, so long or sharply attended sequences never overflow
//! - **Naive recurrence**: the textbook formulation, with the legacy
//!   11-parameter layout
//! - **Manual gradients**: `step` returns a typed record that `propagate`
//!   consumes, accumulating parameter gradients into a [`grads::GradientBuffer`]
//! - **Variable-length batches**: per-timestep [`present::PresentMask`]s, with
//!   state reduction forward and gradient expansion backward
//! - **Persistence**: [`persist::CellArchive`] snapshots config and parameters
//!
//! ## Quick Start
//!
//! ```rust
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//! use rwa::prelude::*;
//!
//! let device = Default::default();
//! let cell = RwaCell::<NdArray<f32>>::new(3, 2, &device);
//! assert_eq!(cell.parameters().len(), 13);
//!
//! let state = cell.start(4);
//! let step = cell.step(&state, Tensor::zeros([4, 3], &device)).unwrap();
//! assert_eq!(step.output.dims(), [4, 2]);
//! ```
//!
//! ## Training Usage
//!
//! ```ignore
//! use rwa::prelude::*;
//!
//! let mut mapped = SequenceMapper::new().map(&cell, &sequence)?;
//! let mut grads = GradientBuffer::new();
//! mapped.propagate(&cell, &output_grads, &mut grads)?;
//!
//! for param in cell.parameters() {
//!     let grad = grads.get(param);
//!     // apply an update
//! }
//! ```

pub mod activation;
pub mod cells;
pub mod error;
pub mod grads;
pub mod nn;
pub mod persist;
pub mod present;
pub mod rnn;

pub mod prelude {
    pub use crate::activation::{LeCun, Squash};
    pub use crate::cells::{
        Block, RecurrentState, RwaCell, RwaConfig, RwaMode, RwaState, RwaStateGrad,
        StateGradient,
    };
    pub use crate::error::{Result, RwaError};
    pub use crate::grads::GradientBuffer;
    pub use crate::persist::CellArchive;
    pub use crate::present::PresentMask;
    pub use crate::rnn::{Rwa, SeqBatch, SequenceMapper};
}
