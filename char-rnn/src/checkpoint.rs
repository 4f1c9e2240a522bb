// ============================================================================
// CHECKPOINT SERIALIZATION
// ============================================================================

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{CharRnnError, Result};
use crate::model::{ModelShape, SequenceModel};
use crate::tensor::Graph;

const FORMAT: &str = "char-rnn/1-bin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f32>,
}

/// Snapshot of every model parameter plus the architecture it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBlob {
    pub format: String,
    pub saved_at: u64,
    pub shape: ModelShape,
    pub tensors: Vec<ParamTensor>,
}

impl ParameterBlob {
    pub fn capture<M: SequenceModel>(g: &Graph, model: &M) -> Self {
        let tensors = model
            .parameters()
            .iter()
            .map(|&t| {
                let (rows, cols) = g.shape(t);
                ParamTensor { rows, cols, data: g.data(t).to_vec() }
            })
            .collect();
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        ParameterBlob { format: FORMAT.to_string(), saved_at, shape: model.shape(), tensors }
    }

    /// Overwrite the model's parameters. Nothing is written unless every
    /// tensor shape matches.
    pub fn restore_into<M: SequenceModel>(&self, g: &mut Graph, model: &M) -> Result<()> {
        let expected = model.shape();
        if self.shape != expected {
            return Err(CharRnnError::IncompatibleModel(format!(
                "stored {:?}, configured {:?}",
                self.shape, expected
            )));
        }
        let ids = model.parameters();
        if ids.len() != self.tensors.len() {
            return Err(CharRnnError::IncompatibleModel(format!(
                "stored {} tensors, model has {}",
                self.tensors.len(),
                ids.len()
            )));
        }
        for (i, (&tid, t)) in ids.iter().zip(&self.tensors).enumerate() {
            let want = g.shape(tid);
            if (t.rows, t.cols) != want || t.data.len() != t.rows * t.cols {
                return Err(CharRnnError::IncompatibleModel(format!(
                    "tensor {} is {}x{} ({} values), model expects {}x{}",
                    i, t.rows, t.cols, t.data.len(), want.0, want.1
                )));
            }
        }
        for (&tid, t) in ids.iter().zip(&self.tensors) {
            g.set_data(tid, &t.data);
        }
        Ok(())
    }

    pub fn param_count(&self) -> usize {
        self.tensors.iter().map(|t| t.data.len()).sum()
    }
}

/// Write-once / read-once parameter store for a single model.
pub trait CheckpointStore {
    fn save(&self, blob: &ParameterBlob) -> Result<()>;
    fn load(&self) -> Result<ParameterBlob>;
}

/// bincode blob on disk.
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCheckpointStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, blob: &ParameterBlob) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(blob)?;
        fs::write(&self.path, &bytes)?;
        tracing::info!(
            "Saved checkpoint to {} ({} params, {:.2} MB)",
            self.path.display(),
            blob.param_count(),
            bytes.len() as f64 / 1_048_576.0
        );
        Ok(())
    }

    fn load(&self) -> Result<ParameterBlob> {
        let bytes = fs::read(&self.path)?;
        let blob: ParameterBlob = bincode::deserialize(&bytes)?;
        tracing::info!(
            "Loaded checkpoint from {} ({} params, saved at {})",
            self.path.display(),
            blob.param_count(),
            blob.saved_at
        );
        Ok(blob)
    }
}

/// Keeps the blob in memory; counts saves.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    blob: RefCell<Option<ParameterBlob>>,
    saves: RefCell<usize>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.borrow()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, blob: &ParameterBlob) -> Result<()> {
        *self.blob.borrow_mut() = Some(blob.clone());
        *self.saves.borrow_mut() += 1;
        tracing::debug!("Stored checkpoint in memory ({} params)", blob.param_count());
        Ok(())
    }

    fn load(&self) -> Result<ParameterBlob> {
        self.blob.borrow().clone().ok_or_else(|| {
            CharRnnError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no checkpoint has been saved",
            ))
        })
    }
}
