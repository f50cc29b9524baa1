//! # Recurrent Cells
//!
//! This module provides the single-timestep RWA cell and the [`Block`]
//! contract it implements. Cells process one timestep at a time and are
//! driven over whole sequences by [`crate::rnn::SequenceMapper`].
//!
//! ## Types
//!
//! | Type | Role |
//! |------|------|
//! | [`RwaCell`] | Recurrent Weighted Average cell, forward and reverse pass |
//! | [`RwaConfig`] | Sizes, [`RwaMode`], squash and initialization seed |
//! | [`RwaState`] | Running average, sums and running maximum between steps |
//! | [`RwaStateGrad`] | Gradient of an [`RwaState`] |
//! | [`RwaRecord`] | Intermediates kept by one step for its reverse pass |
//!
//! ## RWA Operating Modes
//!
//! ### Stabilized Mode (Recommended)
//! ```text
//! m' = max(a, m)
//! n' = n · exp(m - m') + z · exp(a - m')
//! d' = d · exp(m - m') + exp(a - m')
//! ```
//! Only values in `(0, 1]` are exponentiated, so large log-weights cannot
//! overflow. The first step uses `m' = a` and ignores the (empty) past.
//!
//! ### Naive Mode
//! ```text
//! n' = n + z · exp(a)
//! d' = d + exp(a)
//! ```
//! Matches the parameter layout of older saved models (no mixer biases).
//!
//! ## Tensor Shapes
//!
//! | Tensor | Shape | Description |
//! |--------|-------|-------------|
//! | `input` | `[active_batch, input_size]` | Input features |
//! | `output` | `[active_batch, hidden_size]` | Squashed average |
//! | state tensors | `[active_batch, hidden_size]` | One row per active slot |
//!
//! `active_batch` is the number of `true` entries in the state's
//! [`PresentMask`](crate::present::PresentMask).
//!
//! ## Example: Stepping and Back-propagating
//!
//! ```ignore
//! use rwa::cells::RwaCell;
//! use rwa::grads::GradientBuffer;
//!
//! let cell = RwaCell::<Backend>::new(16, 32, &device);
//! let step = cell.step(&cell.start(4), input)?;      // input: [4, 16]
//!
//! let mut grads = GradientBuffer::new();
//! let (input_grad, state_grad) = cell.propagate(step.record, output_grad, None, &mut grads)?;
//! cell.propagate_start(&state_grad, &mut grads)?;
//! ```

pub mod block;
pub mod rwa_cell;
pub mod rwa_record;
pub mod rwa_state;

pub use block::{Block, RecurrentState, StateGradient, StepOutput};
pub use rwa_cell::{RwaCell, RwaConfig, RwaMode};
pub use rwa_record::RwaRecord;
pub use rwa_state::{RwaState, RwaStateGrad};
