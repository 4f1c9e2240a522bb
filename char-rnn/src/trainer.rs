// ============================================================================
// TRAINING SESSION
// ============================================================================

use rand::RngCore;

use crate::corpus::Window;
use crate::error::{CharRnnError, Result};
use crate::model::{Mode, SequenceModel};
use crate::optim::{clip_grad_norm, AdamW};
use crate::tensor::{Graph, TID};

/// Per-position softmax cross-entropy over the vocabulary.
#[derive(Debug, Clone, Copy)]
pub struct CrossEntropy {
    vocab_size: usize,
}

impl CrossEntropy {
    pub fn new(vocab_size: usize) -> Self {
        CrossEntropy { vocab_size }
    }

    pub fn loss(&self, g: &mut Graph, logits: TID, target: usize) -> Result<TID> {
        if target >= self.vocab_size {
            return Err(CharRnnError::IndexOutOfRange { index: target, len: self.vocab_size });
        }
        Ok(g.softmax_ce(logits, target))
    }
}

/// Owns everything a training run mutates: the tape holding the parameters,
/// the model that indexes into it, the optimizer state and the criterion.
pub struct TrainingSession<M: SequenceModel> {
    graph: Graph,
    model: M,
    optimizer: AdamW,
    criterion: CrossEntropy,
    max_grad_norm: Option<f32>,
}

impl<M: SequenceModel> TrainingSession<M> {
    pub fn new(graph: Graph, model: M, learning_rate: f32, weight_decay: f32) -> Self {
        let optimizer = AdamW::new(model.parameters(), &graph, learning_rate, weight_decay);
        let criterion = CrossEntropy::new(model.shape().vocab_size);
        TrainingSession { graph, model, optimizer, criterion, max_grad_norm: None }
    }

    pub fn with_max_grad_norm(mut self, max_grad_norm: Option<f32>) -> Self {
        self.max_grad_norm = max_grad_norm;
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn optimizer(&self) -> &AdamW {
        &self.optimizer
    }

    /// Tape and model borrowed together, for generation or checkpoint restore.
    pub fn split(&mut self) -> (&mut Graph, &M) {
        (&mut self.graph, &self.model)
    }

    /// One pass over `window` from a zero hidden state with ground-truth
    /// inputs, a single backward pass on the summed loss, then one optimizer
    /// update. Returns the mean per-character loss.
    ///
    /// A non-finite loss is reported before backward runs, so parameters are
    /// untouched when this fails.
    pub fn train_step<R: RngCore>(&mut self, window: &Window, rng: &mut R) -> Result<f32> {
        if window.is_empty() || window.input.len() != window.target.len() {
            return Err(CharRnnError::InvalidConfig(format!(
                "window needs matching non-empty input/target, got {}/{}",
                window.input.len(),
                window.target.len()
            )));
        }
        let g = &mut self.graph;
        g.reset();
        g.zero_grad();

        let mut hidden = self.model.init_hidden(g);
        let mut total: Option<TID> = None;
        for (&input, &target) in window.input.iter().zip(&window.target) {
            let (logits, next) = self.model.step(g, input, &hidden, Mode::Train(&mut *rng))?;
            hidden = next;
            let ce = self.criterion.loss(g, logits, target)?;
            total = Some(match total {
                Some(t) => g.add(t, ce),
                None => ce,
            });
        }
        let total = match total {
            Some(t) => t,
            None => return Err(CharRnnError::InvalidConfig("empty window".into())),
        };

        let total_loss = g.data(total)[0];
        if !total_loss.is_finite() {
            return Err(CharRnnError::NumericInstability(format!(
                "training loss ({})",
                total_loss
            )));
        }

        g.backward(total);
        if let Some(max_norm) = self.max_grad_norm {
            let norm = clip_grad_norm(g, &self.model.parameters(), max_norm);
            tracing::trace!("grad norm {:.4}", norm);
        }
        self.optimizer.step(g);

        let mean = total_loss / window.len() as f32;
        tracing::debug!(step = self.optimizer.steps_taken(), loss = mean, "train step");
        Ok(mean)
    }
}
