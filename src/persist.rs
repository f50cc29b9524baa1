//! Saving and restoring trained cells.
//!
//! A [`CellArchive`] pairs the [`RwaConfig`] that shapes a cell with the
//! MessagePack burn record of its parameters. The archive itself is plain serde
//! data, so callers pick the encoding and the storage.

use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};

use crate::cells::{RwaCell, RwaConfig};
use crate::error::{Result, RwaError};

type ArchiveRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellArchive {
    config: RwaConfig,
    record: Vec<u8>,
}

impl CellArchive {
    /// Snapshot a cell's configuration and parameters.
    pub fn capture<B: Backend>(cell: &RwaCell<B>) -> Result<Self> {
        let recorder = ArchiveRecorder::default();
        let record = Recorder::<B>::record(&recorder, cell.clone().into_record(), ())
            .map_err(|e| RwaError::Record(e.to_string()))?;

        tracing::debug!(
            input_size = cell.input_size(),
            hidden_size = cell.hidden_size(),
            bytes = record.len(),
            "captured cell archive"
        );
        Ok(Self {
            config: cell.config(),
            record,
        })
    }

    /// Rebuild the archived cell on `device`.
    ///
    /// Fails with [`RwaError::Record`] if the record cannot be decoded, and
    /// with a shape or count error if its parameters do not fit the
    /// archived configuration.
    pub fn restore<B: Backend>(&self, device: &B::Device) -> Result<RwaCell<B>> {
        let recorder = ArchiveRecorder::default();
        let record = Recorder::<B>::load(&recorder, self.record.clone(), device)
            .map_err(|e| RwaError::Record(e.to_string()))?;

        tracing::debug!(bytes = self.record.len(), "restoring cell archive");
        let fresh = self.config.init::<B>(device);
        let expected: Vec<[usize; 2]> = fresh
            .parameters()
            .iter()
            .map(|p| p.val().dims())
            .collect();
        let cell = fresh.load_record(record);

        let params = cell.parameters();
        if params.len() != expected.len() {
            return Err(RwaError::ParameterCount {
                expected: expected.len(),
                got: params.len(),
            });
        }
        for (index, (param, want)) in params.iter().zip(&expected).enumerate() {
            let got = param.val().dims();
            if got != *want {
                return Err(RwaError::shape(
                    format!("archived parameter {}", index),
                    want,
                    &got,
                ));
            }
        }
        Ok(cell)
    }

    pub fn config(&self) -> &RwaConfig {
        &self.config
    }
}
