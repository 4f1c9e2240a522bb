// ============================================================================
// LOSS CURVE
// ============================================================================
// Averaged training loss, one point every `plot_delay` epochs.
//
// CSV layout:
//   epoch,loss
//   100,2.871304
//   200,2.415520

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossPoint {
    /// Epoch at which the average was taken.
    pub epoch: usize,
    pub loss: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LossCurve {
    points: Vec<LossPoint>,
}

impl LossCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, epoch: usize, loss: f32) {
        self.points.push(LossPoint { epoch, loss });
    }

    pub fn points(&self) -> &[LossPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<f32> {
        self.points.last().map(|p| p.loss)
    }

    /// Overwrites `path`. An empty curve still gets its header row.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if self.points.is_empty() {
            tracing::warn!("Loss curve is empty; '{}' will only hold the header", path.display());
        }
        let mut f = BufWriter::new(File::create(path)?);
        writeln!(f, "epoch,loss")?;
        for p in &self.points {
            writeln!(f, "{},{:.6}", p.epoch, p.loss)?;
        }
        f.flush()?;
        tracing::debug!("Wrote {} loss points to '{}'", self.points.len(), path.display());
        Ok(())
    }
}

/// Sum of step losses since the last reset.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningLoss {
    total: f32,
    count: usize,
}

impl RunningLoss {
    pub fn add(&mut self, loss: f32) {
        self.total += loss;
        self.count += 1;
    }

    /// Mean since the last call, then start over.
    pub fn take_average(&mut self) -> f32 {
        let avg = if self.count == 0 { 0.0 } else { self.total / self.count as f32 };
        *self = RunningLoss::default();
        avg
    }
}
