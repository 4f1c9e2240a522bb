// ============================================================================
// SEQUENCE MODEL
// embedding -> dropout -> stacked GRU -> linear projection to vocab logits
// ============================================================================

use rand::{Rng, RngCore};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{CharRnnError, Result};
use crate::tensor::{Graph, TID};

/// Architecture dimensions; the only thing a checkpoint must agree on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelShape {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
}

/// Train draws dropout masks from the given source; Eval is deterministic.
pub enum Mode<'a> {
    Train(&'a mut dyn RngCore),
    Eval,
}

/// In-graph hidden state: one `1 x hidden_size` node per layer.
#[derive(Debug, Clone)]
pub struct HiddenState {
    layers: Vec<TID>,
}

impl HiddenState {
    pub fn layers(&self) -> &[TID] {
        &self.layers
    }

    /// `(num_layers, hidden_size)`
    pub fn shape(&self, g: &Graph) -> (usize, usize) {
        let cols = self.layers.first().map(|&t| g.shape(t).1).unwrap_or(0);
        (self.layers.len(), cols)
    }

    /// Copy the values out of the graph so the tape can be reset.
    pub fn detach(&self, g: &Graph) -> HiddenValues {
        HiddenValues { rows: self.layers.iter().map(|&t| g.data(t).to_vec()).collect() }
    }
}

/// Hidden state values living outside the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct HiddenValues {
    rows: Vec<Vec<f32>>,
}

impl HiddenValues {
    pub fn zeros(num_layers: usize, hidden_size: usize) -> Self {
        HiddenValues { rows: vec![vec![0.0; hidden_size]; num_layers] }
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    /// Re-enter the values as constants (no gradient flows into them).
    pub fn attach(&self, g: &mut Graph) -> HiddenState {
        let layers = self
            .rows
            .iter()
            .map(|row| g.constant(row.clone(), 1, row.len()))
            .collect();
        HiddenState { layers }
    }
}

/// Single-step capability any recurrent architecture provides.
pub trait SequenceModel {
    fn shape(&self) -> ModelShape;

    /// All-zero state of shape `(num_layers, hidden_size)`.
    fn init_hidden(&self, g: &mut Graph) -> HiddenState {
        let shape = self.shape();
        HiddenValues::zeros(shape.num_layers, shape.hidden_size).attach(g)
    }

    /// One token in, `1 x vocab_size` logits and the next hidden state out.
    fn step(&self, g: &mut Graph, token: usize, hidden: &HiddenState, mode: Mode<'_>)
        -> Result<(TID, HiddenState)>;

    /// Parameter nodes in a fixed order; defines checkpoint layout.
    fn parameters(&self) -> Vec<TID>;
}

// ============================================================================
// LAYERS
// ============================================================================

struct Embedding {
    weight: TID,
    vocab_size: usize,
}

impl Embedding {
    fn forward(&self, idx: usize, g: &mut Graph) -> Result<TID> {
        if idx >= self.vocab_size {
            return Err(CharRnnError::IndexOutOfRange { index: idx, len: self.vocab_size });
        }
        Ok(g.row_slice(self.weight, idx))
    }
}

/// Inverted dropout: survivors are scaled by 1/(1-p).
struct Dropout {
    prob: f32,
}

impl Dropout {
    fn forward(&self, x: TID, mode: Mode<'_>, g: &mut Graph) -> TID {
        let rng = match mode {
            Mode::Train(rng) if self.prob > 0.0 => rng,
            _ => return x,
        };
        let (rows, cols) = g.shape(x);
        let keep = 1.0 - self.prob;
        let mask: Vec<f32> = (0..rows * cols)
            .map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 })
            .collect();
        let mask = g.constant(mask, rows, cols);
        g.mul(x, mask)
    }
}

struct GruLayer {
    wr: TID, ur: TID, br: TID,
    wz: TID, uz: TID, bz: TID,
    wn: TID, un: TID, bin: TID, bhn: TID,
}

impl GruLayer {
    fn forward(&self, x: TID, h_prev: TID, g: &mut Graph) -> TID {
        // r = sigmoid(x @ Wr + h @ Ur + br)
        let r_wx = g.matmul(x, self.wr);
        let r_uh = g.matmul(h_prev, self.ur);
        let r_pre = g.add(r_wx, r_uh);
        let r_pre = g.broadcast_add(r_pre, self.br);
        let r = g.sigmoid(r_pre);

        // z = sigmoid(x @ Wz + h @ Uz + bz)
        let z_wx = g.matmul(x, self.wz);
        let z_uh = g.matmul(h_prev, self.uz);
        let z_pre = g.add(z_wx, z_uh);
        let z_pre = g.broadcast_add(z_pre, self.bz);
        let z = g.sigmoid(z_pre);

        // n = tanh(x @ Wn + bin + r * (h @ Un + bhn))
        let n_wx = g.matmul(x, self.wn);
        let n_wx = g.broadcast_add(n_wx, self.bin);
        let n_uh = g.matmul(h_prev, self.un);
        let n_uh = g.broadcast_add(n_uh, self.bhn);
        let n_gated = g.mul(r, n_uh);
        let n_pre = g.add(n_wx, n_gated);
        let n = g.tanh(n_pre);

        // h = (1-z)*n + z*h_prev
        let omz = g.one_minus(z);
        let h_part1 = g.mul(omz, n);
        let h_part2 = g.mul(z, h_prev);
        g.add(h_part1, h_part2)
    }

    fn param_ids(&self) -> [TID; 10] {
        [self.wr, self.ur, self.br, self.wz, self.uz, self.bz, self.wn, self.un, self.bin, self.bhn]
    }
}

// ============================================================================
// GRU LANGUAGE MODEL
// ============================================================================

pub struct GruModel {
    shape: ModelShape,
    embedding: Embedding,
    dropout: Dropout,
    layers: Vec<GruLayer>,
    decoder_w: TID,
    decoder_b: TID,
}

#[derive(Clone, Copy)]
enum Init {
    Embedding,
    Weight,
    Bias,
}

impl GruModel {
    /// Random init: embedding rows ~ N(0,1), weights ~ N(0, 1/hidden), biases 0.
    pub fn new<R: Rng + ?Sized>(shape: ModelShape, dropout_prob: f32, g: &mut Graph, rng: &mut R) -> Result<Self> {
        let ws = (1.0 / shape.hidden_size.max(1) as f32).sqrt();
        Self::build(shape, dropout_prob, g, |n, init| {
            let scale = match init {
                Init::Embedding => 1.0,
                Init::Weight => ws,
                Init::Bias => return vec![0.0; n],
            };
            (0..n).map(|_| rng.sample::<f32, _>(StandardNormal) * scale).collect()
        })
    }

    /// Every parameter zero. Outputs are fully deterministic.
    pub fn zeroed(shape: ModelShape, dropout_prob: f32, g: &mut Graph) -> Result<Self> {
        Self::build(shape, dropout_prob, g, |n, _| vec![0.0; n])
    }

    fn build(
        shape: ModelShape,
        dropout_prob: f32,
        g: &mut Graph,
        mut fill: impl FnMut(usize, Init) -> Vec<f32>,
    ) -> Result<Self> {
        let ModelShape { vocab_size: v, hidden_size: h, num_layers } = shape;
        if v == 0 || h == 0 || num_layers == 0 {
            return Err(CharRnnError::InvalidConfig(format!(
                "model dimensions must be > 0, got {:?}",
                shape
            )));
        }
        if !(0.0..1.0).contains(&dropout_prob) {
            return Err(CharRnnError::InvalidConfig(format!(
                "dropout_prob must be in [0, 1), got {}",
                dropout_prob
            )));
        }

        let embedding = Embedding { weight: g.param(fill(v * h, Init::Embedding), v, h), vocab_size: v };
        let mut layers = Vec::with_capacity(num_layers);
        for _ in 0..num_layers {
            layers.push(GruLayer {
                wr: g.param(fill(h * h, Init::Weight), h, h),
                ur: g.param(fill(h * h, Init::Weight), h, h),
                br: g.param(fill(h, Init::Bias), 1, h),
                wz: g.param(fill(h * h, Init::Weight), h, h),
                uz: g.param(fill(h * h, Init::Weight), h, h),
                bz: g.param(fill(h, Init::Bias), 1, h),
                wn: g.param(fill(h * h, Init::Weight), h, h),
                un: g.param(fill(h * h, Init::Weight), h, h),
                bin: g.param(fill(h, Init::Bias), 1, h),
                bhn: g.param(fill(h, Init::Bias), 1, h),
            });
        }
        let decoder_w = g.param(fill(h * v, Init::Weight), h, v);
        let decoder_b = g.param(fill(v, Init::Bias), 1, v);

        Ok(GruModel {
            shape,
            embedding,
            dropout: Dropout { prob: dropout_prob },
            layers,
            decoder_w,
            decoder_b,
        })
    }

    pub fn total_params(&self, g: &Graph) -> usize {
        self.parameters().iter().map(|&t| g.data(t).len()).sum()
    }
}

impl SequenceModel for GruModel {
    fn shape(&self) -> ModelShape {
        self.shape
    }

    fn step(&self, g: &mut Graph, token: usize, hidden: &HiddenState, mode: Mode<'_>)
        -> Result<(TID, HiddenState)> {
        if hidden.layers.len() != self.layers.len() {
            return Err(CharRnnError::IncompatibleModel(format!(
                "hidden state has {} layers, model has {}",
                hidden.layers.len(),
                self.layers.len()
            )));
        }
        let want = (1, self.shape.hidden_size);
        for (i, &h) in hidden.layers.iter().enumerate() {
            if g.shape(h) != want {
                return Err(CharRnnError::IncompatibleModel(format!(
                    "hidden layer {} is {:?}, model expects {:?}",
                    i,
                    g.shape(h),
                    want
                )));
            }
        }

        let emb = self.embedding.forward(token, g)?;
        let mut x = self.dropout.forward(emb, mode, g);

        let mut next = Vec::with_capacity(self.layers.len());
        for (layer, &h_prev) in self.layers.iter().zip(hidden.layers.iter()) {
            x = layer.forward(x, h_prev, g);
            next.push(x);
        }

        let logits = g.matmul(x, self.decoder_w);
        let logits = g.broadcast_add(logits, self.decoder_b);
        Ok((logits, HiddenState { layers: next }))
    }

    fn parameters(&self) -> Vec<TID> {
        let mut ids = vec![self.embedding.weight];
        for l in &self.layers {
            ids.extend(l.param_ids());
        }
        ids.push(self.decoder_w);
        ids.push(self.decoder_b);
        ids
    }
}
