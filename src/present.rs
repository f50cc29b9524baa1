//! Present masks for variable-length batches.
//!
//! A [`PresentMask`] has one entry per batch slot. Tensors that belong to a
//! timestep only carry rows for the active slots: row `i` belongs to the
//! `i`-th `true` entry of the mask, read left to right.
//!
//! ```text
//! mask:   [T, F, T, T]      capacity 4, 3 active
//! rows:    0     1  2
//! ```

use burn::tensor::{backend::Backend, Tensor};

use crate::error::{Result, RwaError};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PresentMask {
    slots: Vec<bool>,
}

impl PresentMask {
    pub fn new(slots: Vec<bool>) -> Self {
        Self { slots }
    }

    /// A mask with every one of `capacity` slots active.
    pub fn full(capacity: usize) -> Self {
        Self {
            slots: vec![true; capacity],
        }
    }

    /// Nominal batch capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of active slots, i.e. the row count of tensors under this mask.
    pub fn num_present(&self) -> usize {
        self.slots.iter().filter(|&&p| p).count()
    }

    pub fn is_present(&self, slot: usize) -> bool {
        self.slots.get(slot).copied().unwrap_or(false)
    }

    pub fn slots(&self) -> &[bool] {
        &self.slots
    }

    /// Row index of every active slot, `None` for inactive slots.
    fn row_indices(&self) -> Vec<Option<usize>> {
        let mut next = 0;
        self.slots
            .iter()
            .map(|&p| {
                if p {
                    next += 1;
                    Some(next - 1)
                } else {
                    None
                }
            })
            .collect()
    }

    /// True if every slot active in `self` is also active in `other`.
    pub fn is_subset_of(&self, other: &PresentMask) -> bool {
        self.capacity() == other.capacity()
            && self
                .slots
                .iter()
                .zip(&other.slots)
                .all(|(&mine, &theirs)| !mine || theirs)
    }

    /// Keeps the rows of `tensor` (laid out under `self`) for the slots active in `target`.
    pub fn reduce_rows<B: Backend>(
        &self,
        tensor: Tensor<B, 2>,
        target: &PresentMask,
    ) -> Result<Tensor<B, 2>> {
        self.check_rows("reduce source", &tensor)?;
        if !target.is_subset_of(self) {
            return Err(RwaError::invariant(format!(
                "cannot reduce mask {:?} to {:?}: target activates a slot the source lacks",
                self.slots, target.slots
            )));
        }
        if target.num_present() == 0 {
            return Err(RwaError::invariant("cannot reduce to a mask with no active slots"));
        }
        if target == self {
            return Ok(tensor);
        }

        let rows: Vec<Tensor<B, 2>> = self
            .row_indices()
            .into_iter()
            .zip(&target.slots)
            .filter_map(|(row, &keep)| match row {
                Some(row) if keep => Some(tensor.clone().narrow(0, row, 1)),
                _ => None,
            })
            .collect();

        Ok(Tensor::cat(rows, 0))
    }

    /// Re-inserts zero rows into `tensor` (laid out under `self`) for slots
    /// active in `target` but not in `self`.
    pub fn expand_rows<B: Backend>(
        &self,
        tensor: Tensor<B, 2>,
        target: &PresentMask,
    ) -> Result<Tensor<B, 2>> {
        self.check_rows("expand source", &tensor)?;
        if !self.is_subset_of(target) {
            return Err(RwaError::invariant(format!(
                "cannot expand mask {:?} to {:?}: target drops an active slot",
                self.slots, target.slots
            )));
        }
        if target == self {
            return Ok(tensor);
        }

        let [_, width] = tensor.dims();
        let device = tensor.device();
        let rows: Vec<Tensor<B, 2>> = self
            .row_indices()
            .into_iter()
            .zip(&target.slots)
            .filter(|(_, wanted)| **wanted)
            .map(|(row, _)| match row {
                Some(row) => tensor.clone().narrow(0, row, 1),
                None => Tensor::zeros([1, width], &device),
            })
            .collect();

        Ok(Tensor::cat(rows, 0))
    }

    fn check_rows<B: Backend>(&self, what: &str, tensor: &Tensor<B, 2>) -> Result<()> {
        let [rows, width] = tensor.dims();
        if rows != self.num_present() {
            return Err(RwaError::shape(what, &[self.num_present(), width], &[rows, width]));
        }
        Ok(())
    }
}

impl From<Vec<bool>> for PresentMask {
    fn from(slots: Vec<bool>) -> Self {
        Self::new(slots)
    }
}

impl From<&[bool]> for PresentMask {
    fn from(slots: &[bool]) -> Self {
        Self::new(slots.to_vec())
    }
}
