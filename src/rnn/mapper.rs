//! Stepping a [`Block`] over variable-length batched sequences.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::cells::{Block, RecurrentState, StateGradient};
use crate::error::{ensure_finite, Result, RwaError};
use crate::grads::GradientBuffer;
use crate::present::PresentMask;

/// One timestep of a batched sequence.
///
/// `packed` has one row per active slot of `present`.
#[derive(Debug, Clone)]
pub struct SeqBatch<B: Backend> {
    pub packed: Tensor<B, 2>,
    pub present: PresentMask,
}

impl<B: Backend> SeqBatch<B> {
    pub fn new(packed: Tensor<B, 2>, present: PresentMask) -> Result<Self> {
        let [rows, cols] = packed.dims();
        if rows != present.num_present() {
            return Err(RwaError::shape(
                "sequence batch",
                &[present.num_present(), cols],
                &[rows, cols],
            ));
        }
        Ok(Self { packed, present })
    }

    /// A batch with every slot active.
    pub fn dense(packed: Tensor<B, 2>) -> Self {
        let [rows, _] = packed.dims();
        Self {
            packed,
            present: PresentMask::full(rows),
        }
    }
}

/// Maps sequences through a [`Block`].
///
/// Slots may end before others: each timestep's mask must be a subset of
/// the previous one, and the state is reduced to it before stepping.
#[derive(Debug, Clone, Default)]
pub struct SequenceMapper {
    check_finite: bool,
}

impl SequenceMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`RwaError::NumericDegenerate`] as soon as an output
    /// contains NaN or an infinity. Off by default since it reads every
    /// output back to the host.
    pub fn with_finite_check(mut self, check_finite: bool) -> Self {
        self.check_finite = check_finite;
        self
    }

    /// Run `block` over `seq`, starting from `block.start(capacity)`.
    pub fn map<B, C>(&self, block: &C, seq: &[SeqBatch<B>]) -> Result<MappedSequence<B, C>>
    where
        B: Backend,
        C: Block<B>,
    {
        let first = seq
            .first()
            .ok_or_else(|| RwaError::invariant("cannot map an empty sequence"))?;
        let capacity = first.present.capacity();
        self.map_from(block, block.start(capacity), seq)
    }

    /// Run `block` over `seq` from an explicit initial state.
    ///
    /// The initial state's gradient is handed to
    /// [`Block::propagate_start`] on the way back.
    pub fn map_from<B, C>(
        &self,
        block: &C,
        initial: C::State,
        seq: &[SeqBatch<B>],
    ) -> Result<MappedSequence<B, C>>
    where
        B: Backend,
        C: Block<B>,
    {
        let start_mask = initial.present().clone();
        let mut state = initial;
        let mut outputs = Vec::with_capacity(seq.len());
        let mut records = Vec::with_capacity(seq.len());

        for (t, batch) in seq.iter().enumerate() {
            if batch.present.capacity() != start_mask.capacity() {
                return Err(RwaError::invariant(format!(
                    "timestep {} has capacity {}, sequence started with {}",
                    t,
                    batch.present.capacity(),
                    start_mask.capacity()
                )));
            }
            if state.present() != &batch.present {
                tracing::debug!(
                    timestep = t,
                    from = state.present().num_present(),
                    to = batch.present.num_present(),
                    "reducing state"
                );
                state = state.reduce(&batch.present)?;
            }

            let step = block.step(&state, batch.packed.clone())?;
            if self.check_finite {
                if let Err(err) = ensure_finite("step output", &step.output) {
                    tracing::warn!(timestep = t, "non-finite output");
                    return Err(err);
                }
            }

            outputs.push(SeqBatch {
                packed: step.output,
                present: batch.present.clone(),
            });
            records.push(Some(step.record));
            state = step.state;
        }

        Ok(MappedSequence {
            start_mask,
            outputs,
            records,
            final_state: state,
        })
    }
}

/// Outputs of a mapped sequence, plus everything needed to propagate
/// gradients back through it once.
pub struct MappedSequence<B: Backend, C: Block<B>> {
    start_mask: PresentMask,
    outputs: Vec<SeqBatch<B>>,
    records: Vec<Option<C::Record>>,
    final_state: C::State,
}

impl<B: Backend, C: Block<B>> MappedSequence<B, C> {
    pub fn outputs(&self) -> &[SeqBatch<B>] {
        &self.outputs
    }

    pub fn into_outputs(self) -> Vec<SeqBatch<B>> {
        self.outputs
    }

    /// State after the last timestep.
    pub fn final_state(&self) -> &C::State {
        &self.final_state
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Back-propagate `upstream` (one gradient per output timestep) through
    /// the whole sequence, including the initial state.
    ///
    /// Returns one input gradient per timestep. Each forward record is
    /// consumed as it is used; a second call fails with
    /// [`RwaError::InvariantViolation`].
    pub fn propagate(
        &mut self,
        block: &C,
        upstream: &[Tensor<B, 2>],
        grads: &mut GradientBuffer<B>,
    ) -> Result<Vec<Tensor<B, 2>>> {
        if upstream.len() != self.records.len() {
            return Err(RwaError::shape(
                "upstream gradients",
                &[self.records.len()],
                &[upstream.len()],
            ));
        }

        let mut input_grads = Vec::with_capacity(upstream.len());
        let mut next: Option<C::StateGrad> = None;

        for t in (0..self.records.len()).rev() {
            let record = self.records[t].take().ok_or_else(|| {
                RwaError::invariant(format!("timestep {} was already propagated", t))
            })?;
            let mask = &self.outputs[t].present;
            let next_grad = match next.take() {
                Some(grad) if grad.present() != mask => Some(grad.expand(mask)?),
                other => other,
            };

            let (input_grad, state_grad) =
                block.propagate(record, upstream[t].clone(), next_grad, grads)?;
            input_grads.push(input_grad);
            next = Some(state_grad);
        }

        if let Some(grad) = next {
            let grad = if grad.present() != &self.start_mask {
                grad.expand(&self.start_mask)?
            } else {
                grad
            };
            block.propagate_start(&grad, grads)?;
        }

        input_grads.reverse();
        Ok(input_grads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::RwaCell;
    use burn::backend::NdArray;
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn batch(rows: usize, present: Vec<bool>) -> SeqBatch<TestBackend> {
        let packed = Tensor::random(
            [rows, 3],
            Distribution::Uniform(-1.0, 1.0),
            &Default::default(),
        );
        SeqBatch::new(packed, PresentMask::from(present)).unwrap()
    }

    #[test]
    fn test_seq_batch_checks_rows() {
        let packed = Tensor::<TestBackend, 2>::zeros([2, 3], &Default::default());
        assert!(SeqBatch::new(packed.clone(), PresentMask::full(3)).is_err());
        assert_eq!(SeqBatch::dense(packed).present.num_present(), 2);
    }

    #[test]
    fn test_map_shrinking_batch() {
        let device = Default::default();
        let cell = RwaCell::<TestBackend>::new(3, 2, &device);
        let seq = vec![
            batch(3, vec![true, true, true]),
            batch(3, vec![true, true, true]),
            batch(2, vec![true, false, true]),
        ];

        let mapped = SequenceMapper::new().map(&cell, &seq).unwrap();
        assert_eq!(mapped.len(), 3);
        assert_eq!(mapped.outputs()[0].packed.dims(), [3, 2]);
        assert_eq!(mapped.outputs()[2].packed.dims(), [2, 2]);
        assert_eq!(mapped.final_state().batch_size(), 2);
    }

    #[test]
    fn test_map_rejects_growing_batch() {
        let device = Default::default();
        let cell = RwaCell::<TestBackend>::new(3, 2, &device);
        let seq = vec![batch(1, vec![true, false]), batch(2, vec![true, true])];

        assert!(matches!(
            SequenceMapper::new().map(&cell, &seq),
            Err(RwaError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_map_rejects_empty_sequence() {
        let device = Default::default();
        let cell = RwaCell::<TestBackend>::new(3, 2, &device);
        let seq: Vec<SeqBatch<TestBackend>> = Vec::new();
        assert!(SequenceMapper::new().map(&cell, &seq).is_err());
    }

    #[test]
    fn test_propagate_twice_fails() {
        let device = Default::default();
        let cell = RwaCell::<TestBackend>::new(3, 2, &device);
        let seq = vec![batch(2, vec![true, true]), batch(1, vec![false, true])];

        let mut mapped = SequenceMapper::new().map(&cell, &seq).unwrap();
        let upstream: Vec<_> = mapped
            .outputs()
            .iter()
            .map(|out| out.packed.ones_like())
            .collect();

        let mut grads = GradientBuffer::new();
        let input_grads = mapped.propagate(&cell, &upstream, &mut grads).unwrap();
        assert_eq!(input_grads[0].dims(), [2, 3]);
        assert_eq!(input_grads[1].dims(), [1, 3]);
        assert_eq!(grads.len(), 13);

        assert!(matches!(
            mapped.propagate(&cell, &upstream, &mut grads),
            Err(RwaError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_propagate_checks_upstream_count() {
        let device = Default::default();
        let cell = RwaCell::<TestBackend>::new(3, 2, &device);
        let seq = vec![batch(2, vec![true, true])];

        let mut mapped = SequenceMapper::new().map(&cell, &seq).unwrap();
        let mut grads = GradientBuffer::new();
        assert!(matches!(
            mapped.propagate(&cell, &[], &mut grads),
            Err(RwaError::ShapeMismatch { .. })
        ));
    }
}
