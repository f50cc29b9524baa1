//! # Sequence Processing
//!
//! Drivers that step a cell over time. [`SequenceMapper`] works with any
//! [`Block`](crate::cells::Block) and batches whose entries end at different
//! times; [`Rwa`] is a convenience layer for dense 3D input.
//!
//! ## Available Drivers
//!
//! | Driver | Input | Reverse pass |
//! |--------|-------|--------------|
//! | [`SequenceMapper`] | `&[SeqBatch]`, one per timestep | ✓ [`MappedSequence::propagate`] |
//! | [`Rwa`] | `[batch, seq, features]` | No |
//!
//! ## Variable-length Batches
//!
//! Every timestep carries a [`PresentMask`](crate::present::PresentMask)
//! over a fixed number of slots. Masks may only lose slots as time goes on:
//!
//! ```text
//! t=0  [T, T, T]    packed rows: 3
//! t=1  [T, T, T]    packed rows: 3
//! t=2  [T, F, T]    packed rows: 2   (slot 1 has ended)
//! ```
//!
//! When the mask shrinks the state is reduced to the remaining slots. On the
//! way back, state gradients are expanded with zero rows for slots that were
//! not yet dropped.
//!
//! ## Example: Training Step
//!
//! ```ignore
//! use rwa::prelude::*;
//!
//! let cell = RwaCell::<Backend>::new(3, 2, &device);
//! let mut mapped = SequenceMapper::new()
//!     .with_finite_check(true)
//!     .map(&cell, &sequence)?;
//!
//! // One gradient per output, from the loss
//! let upstream: Vec<_> = mapped.outputs().iter().map(|o| loss_grad(&o.packed)).collect();
//!
//! let mut grads = GradientBuffer::new();
//! let input_grads = mapped.propagate(&cell, &upstream, &mut grads)?;
//! ```
//!
//! ## Example: Dense Input
//!
//! ```ignore
//! let rwa = Rwa::<Backend>::new(16, 32, &device).with_return_sequences(false);
//!
//! let (output, state) = rwa.forward(input, None)?;      // input: [4, 10, 16]
//! // output: [4, 1, 32]
//! let (output, state) = rwa.forward(next_input, Some(state))?;
//! ```

pub mod mapper;
pub mod rwa;

pub use mapper::{MappedSequence, SeqBatch, SequenceMapper};
pub use rwa::Rwa;
