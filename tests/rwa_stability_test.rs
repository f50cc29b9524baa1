#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tensor, TensorData};
    use rwa::prelude::*;

    type Backend = NdArray<f32>;

    fn random_sequence(steps: usize, batch: usize, features: usize) -> Vec<SeqBatch<Backend>> {
        let device = Default::default();
        (0..steps)
            .map(|_| {
                SeqBatch::dense(Tensor::random(
                    [batch, features],
                    Distribution::Uniform(-1.0, 1.0),
                    &device,
                ))
            })
            .collect()
    }

    fn outputs(cell: &RwaCell<Backend>, seq: &[SeqBatch<Backend>]) -> Result<Vec<Vec<f32>>> {
        let mapped = SequenceMapper::new().with_finite_check(true).map(cell, seq)?;
        Ok(mapped
            .outputs()
            .iter()
            .map(|out| out.packed.to_data().iter::<f32>().collect())
            .collect())
    }

    /// Adds `shift` to every entry of the context mixer's input bias, which
    /// moves every log-weight by the same amount.
    fn shift_log_weights(cell: RwaCell<Backend>, shift: f64) -> RwaCell<Backend> {
        let index = match cell.mode() {
            RwaMode::Stabilized => 9,
            RwaMode::Naive => 8,
        };
        let mut values = cell.parameter_values();
        for v in values[index].iter_mut() {
            *v += shift;
        }
        cell.load_parameters(&values).unwrap()
    }

    #[test]
    fn test_uniform_log_weight_shift_is_harmless_when_stabilized() {
        let device = Default::default();
        let cell = RwaConfig::new(3, 4).with_seed(9).init::<Backend>(&device);
        let seq = random_sequence(8, 2, 3);

        let reference = outputs(&cell, &seq).unwrap();
        let shifted = outputs(&shift_log_weights(cell, 500.0), &seq).unwrap();

        for (a, b) in reference.iter().flatten().zip(shifted.iter().flatten()) {
            assert!((a - b).abs() < 1e-3, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_uniform_log_weight_shift_overflows_naive() {
        let device = Default::default();
        let cell = RwaConfig::new(3, 4)
            .with_seed(9)
            .with_mode(RwaMode::Naive)
            .init::<Backend>(&device);
        let seq = random_sequence(8, 2, 3);

        assert!(outputs(&cell, &seq).is_ok());
        assert!(matches!(
            outputs(&shift_log_weights(cell, 500.0), &seq),
            Err(RwaError::NumericDegenerate { .. })
        ));
    }

    #[test]
    fn test_rebased_state_continues_identically() {
        let device = Default::default();
        let cell = RwaConfig::new(3, 2).with_seed(4).init::<Backend>(&device);
        let seq = random_sequence(4, 3, 3);

        let mapped = SequenceMapper::new().map(&cell, &seq[..2]).unwrap();
        let state = mapped.final_state().clone();

        let tail = SequenceMapper::new();
        let plain = tail.map_from(&cell, state.clone(), &seq[2..]).unwrap();
        for shift in [-50.0f32, 50.0] {
            let rebased = tail
                .map_from(&cell, state.rebased(shift).unwrap(), &seq[2..])
                .unwrap();
            for (a, b) in plain.outputs().iter().zip(rebased.outputs()) {
                let diff: f32 = (a.packed.clone() - b.packed.clone())
                    .abs()
                    .max()
                    .into_scalar();
                assert!(diff < 1e-4, "shift {} changed outputs by {}", shift, diff);
            }
        }
    }

    fn values(t: &Tensor<Backend, 2>) -> Vec<f32> {
        t.to_data().iter::<f32>().collect()
    }

    #[test]
    fn test_reduce_expand_round_trip() {
        let device = Default::default();
        let full = PresentMask::full(4);
        let partial = PresentMask::from(vec![true, false, false, true]);

        let data: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let tensor = Tensor::<Backend, 2>::from_data(TensorData::new(data, [4, 2]), &device);

        let reduced = full.reduce_rows(tensor, &partial).unwrap();
        assert_eq!(reduced.dims(), [2, 2]);
        let expanded = partial.expand_rows(reduced.clone(), &full).unwrap();
        assert_eq!(
            values(&expanded),
            vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 6.0, 7.0]
        );

        let again = full.reduce_rows(expanded, &partial).unwrap();
        assert_eq!(values(&again), values(&reduced));
    }

    #[test]
    fn test_reduced_state_survives_expand_and_reduce() {
        let device = Default::default();
        let cell = RwaConfig::new(3, 2).with_seed(8).init::<Backend>(&device);
        let full = PresentMask::full(4);
        let partial = PresentMask::from(vec![false, true, false, true]);

        let input =
            Tensor::<Backend, 2>::random([4, 3], Distribution::Uniform(-1.0, 1.0), &device);
        let state = cell.step(&cell.start(4), input).unwrap().state;
        let reduced = state.reduce(&partial).unwrap();
        assert_eq!(reduced.present(), &partial);

        let max = state.max_log_weight().unwrap();
        let reduced_max = reduced.max_log_weight().unwrap();
        let all = values(max);
        assert_eq!(values(reduced_max), vec![all[2], all[3], all[6], all[7]]);

        let tensors = [
            reduced.hidden(),
            reduced.numerator(),
            reduced.denominator(),
            reduced_max,
        ];
        for tensor in tensors {
            let expanded = partial.expand_rows(tensor.clone(), &full).unwrap();
            let again = full.reduce_rows(expanded, &partial).unwrap();
            assert_eq!(values(&again), values(tensor));
        }

        // reducing twice is the same as reducing once to the final mask
        let last = PresentMask::from(vec![false, false, false, true]);
        let stepwise = reduced.reduce(&last).unwrap();
        let direct = state.reduce(&last).unwrap();
        assert_eq!(
            values(stepwise.max_log_weight().unwrap()),
            values(direct.max_log_weight().unwrap())
        );
        assert_eq!(values(stepwise.hidden()), values(direct.hidden()));
    }

    #[test]
    fn test_state_gradient_expands_with_zero_rows() {
        let device = Default::default();
        let cell = RwaCell::<Backend>::new(3, 2, &device);
        let reduced = cell
            .start(3)
            .reduce(&PresentMask::from(vec![false, true, true]))
            .unwrap();

        let grad = RwaStateGrad::new(
            reduced.present().clone(),
            Tensor::<Backend, 2>::ones([2, 2], &device),
            Tensor::<Backend, 2>::ones([2, 2], &device),
            Tensor::<Backend, 2>::ones([2, 2], &device),
        )
        .unwrap()
        .expand(&PresentMask::full(3))
        .unwrap();

        let hidden: Vec<f32> = grad.hidden().to_data().iter::<f32>().collect();
        assert_eq!(hidden, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_archive_round_trip_through_json() {
        let device = Default::default();
        let cell = RwaConfig::new(3, 4)
            .with_seed(21)
            .with_mode(RwaMode::Naive)
            .init::<Backend>(&device);
        let seq = random_sequence(5, 2, 3);

        let archive = CellArchive::capture(&cell).unwrap();
        let json = serde_json::to_string(&archive).unwrap();
        let decoded: CellArchive = serde_json::from_str(&json).unwrap();
        let restored: RwaCell<Backend> = decoded.restore(&device).unwrap();

        assert_eq!(restored.mode(), RwaMode::Naive);
        assert_eq!(restored.parameter_values(), cell.parameter_values());
        assert_eq!(outputs(&restored, &seq).unwrap(), outputs(&cell, &seq).unwrap());
    }
}
