// ============================================================================
// VECTORIZED TENSOR AUTODIFF ENGINE
// Each node = dense row-major matrix. Parameters sit at the front of the
// tape and survive `reset`; everything a step builds is appended after them.
// ============================================================================

#[inline]
fn vec_add(a: &[f32], b: &[f32]) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

#[inline]
fn vec_add_inplace(a: &mut [f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) {
        *x += y;
    }
}

#[inline]
fn vec_mul(a: &[f32], b: &[f32]) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).collect()
}

#[inline]
fn vec_sigmoid(a: &[f32]) -> Vec<f32> {
    a.iter().map(|&x| 1.0 / (1.0 + (-x).exp())).collect()
}

#[inline]
fn vec_tanh(a: &[f32]) -> Vec<f32> {
    a.iter().map(|&x| x.tanh()).collect()
}

#[inline]
pub(crate) fn vec_max(a: &[f32]) -> f32 {
    a.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
}

/// Handle to a node on the tape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TID(usize);

#[derive(Clone, Debug)]
enum TensorOp {
    Leaf,
    MatMul { a: TID, b: TID, m: usize, k: usize, n: usize },
    Add { a: TID, b: TID },
    Mul { a: TID, b: TID },
    OneMinus { a: TID },
    Sigmoid { a: TID },
    Tanh { a: TID },
    BroadcastAdd { a: TID, bias: TID, rows: usize, cols: usize },
    RowSlice { a: TID, row: usize, cols: usize },
    SoftmaxCE { logits: TID, target_idx: usize, vocab: usize },
}

struct TensorNode {
    data: Vec<f32>,
    grad: Vec<f32>,
    rows: usize,
    cols: usize,
    op: TensorOp,
}

pub struct Graph {
    nodes: Vec<TensorNode>,
    param_boundary: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Graph { nodes: Vec::with_capacity(4096), param_boundary: 0 }
    }

    fn push(&mut self, data: Vec<f32>, rows: usize, cols: usize, op: TensorOp) -> TID {
        assert_eq!(data.len(), rows * cols, "node data does not fill [{},{}]", rows, cols);
        let len = data.len();
        let id = self.nodes.len();
        self.nodes.push(TensorNode { data, grad: vec![0.0; len], rows, cols, op });
        TID(id)
    }

    pub fn param(&mut self, data: Vec<f32>, rows: usize, cols: usize) -> TID {
        debug_assert_eq!(self.nodes.len(), self.param_boundary, "params must precede activations");
        let id = self.push(data, rows, cols, TensorOp::Leaf);
        self.param_boundary = self.nodes.len();
        id
    }

    pub fn constant(&mut self, data: Vec<f32>, rows: usize, cols: usize) -> TID {
        self.push(data, rows, cols, TensorOp::Leaf)
    }

    /// Drop every node built after the parameters.
    pub fn reset(&mut self) {
        self.nodes.truncate(self.param_boundary);
    }

    pub fn zero_grad(&mut self) {
        for node in self.nodes.iter_mut() {
            node.grad.iter_mut().for_each(|g| *g = 0.0);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn data(&self, t: TID) -> &[f32] {
        &self.nodes[t.0].data
    }

    pub fn grad(&self, t: TID) -> &[f32] {
        &self.nodes[t.0].grad
    }

    pub fn shape(&self, t: TID) -> (usize, usize) {
        (self.nodes[t.0].rows, self.nodes[t.0].cols)
    }

    pub(crate) fn grad_mut(&mut self, t: TID) -> &mut [f32] {
        &mut self.nodes[t.0].grad
    }

    /// Parameter values and their gradients, for the optimizer.
    pub(crate) fn param_slots(&mut self, t: TID) -> (&mut [f32], &[f32]) {
        let node = &mut self.nodes[t.0];
        (&mut node.data, &node.grad)
    }

    /// Overwrite a parameter's values. The caller checks the length.
    pub(crate) fn set_data(&mut self, t: TID, values: &[f32]) {
        self.nodes[t.0].data.copy_from_slice(values);
    }

    // ------------------------------------------------------------------
    // Forward ops: each pushes one node
    // ------------------------------------------------------------------

    pub fn matmul(&mut self, a: TID, b: TID) -> TID {
        let m = self.nodes[a.0].rows;
        let k = self.nodes[a.0].cols;
        let n = self.nodes[b.0].cols;
        assert_eq!(k, self.nodes[b.0].rows, "matmul shape [{},{}] @ [{},{}]",
            m, k, self.nodes[b.0].rows, n);

        let a_data = &self.nodes[a.0].data;
        let b_data = &self.nodes[b.0].data;
        let mut out = vec![0.0f32; m * n];

        // SAFETY: `push` guarantees every node holds rows * cols values, so with
        // the inner dimensions checked above `a` is m*k, `b` is k*n and `out` m*n.
        unsafe {
            matrixmultiply::sgemm(
                m, k, n,
                1.0,
                a_data.as_ptr(), k as isize, 1,
                b_data.as_ptr(), n as isize, 1,
                0.0,
                out.as_mut_ptr(), n as isize, 1,
            );
        }

        self.push(out, m, n, TensorOp::MatMul { a, b, m, k, n })
    }

    pub fn add(&mut self, a: TID, b: TID) -> TID {
        let data = vec_add(&self.nodes[a.0].data, &self.nodes[b.0].data);
        let (r, c) = self.shape(a);
        self.push(data, r, c, TensorOp::Add { a, b })
    }

    pub fn mul(&mut self, a: TID, b: TID) -> TID {
        let data = vec_mul(&self.nodes[a.0].data, &self.nodes[b.0].data);
        let (r, c) = self.shape(a);
        self.push(data, r, c, TensorOp::Mul { a, b })
    }

    pub fn one_minus(&mut self, a: TID) -> TID {
        let data = self.nodes[a.0].data.iter().map(|x| 1.0 - x).collect();
        let (r, c) = self.shape(a);
        self.push(data, r, c, TensorOp::OneMinus { a })
    }

    pub fn sigmoid(&mut self, a: TID) -> TID {
        let data = vec_sigmoid(&self.nodes[a.0].data);
        let (r, c) = self.shape(a);
        self.push(data, r, c, TensorOp::Sigmoid { a })
    }

    pub fn tanh(&mut self, a: TID) -> TID {
        let data = vec_tanh(&self.nodes[a.0].data);
        let (r, c) = self.shape(a);
        self.push(data, r, c, TensorOp::Tanh { a })
    }

    /// [m,n] + [1,n] broadcast bias add
    pub fn broadcast_add(&mut self, a: TID, bias: TID) -> TID {
        let (rows, cols) = self.shape(a);
        debug_assert_eq!(self.nodes[bias.0].data.len(), cols);
        let bd = &self.nodes[bias.0].data;
        let mut out = self.nodes[a.0].data.clone();
        for row in out.chunks_mut(cols) {
            vec_add_inplace(row, bd);
        }
        self.push(out, rows, cols, TensorOp::BroadcastAdd { a, bias, rows, cols })
    }

    pub fn row_slice(&mut self, a: TID, row: usize) -> TID {
        let cols = self.nodes[a.0].cols;
        debug_assert!(row < self.nodes[a.0].rows);
        let off = row * cols;
        let data = self.nodes[a.0].data[off..off + cols].to_vec();
        self.push(data, 1, cols, TensorOp::RowSlice { a, row, cols })
    }

    /// Fused softmax cross-entropy: [1, vocab] + target -> scalar loss
    pub fn softmax_ce(&mut self, logits: TID, target_idx: usize) -> TID {
        let vocab = self.nodes[logits.0].cols;
        debug_assert!(target_idx < vocab);
        let ld = &self.nodes[logits.0].data;
        let max_l = vec_max(ld);
        let sum_exp: f32 = ld.iter().map(|&l| (l - max_l).exp()).sum();
        let loss = sum_exp.ln() + max_l - ld[target_idx];
        self.push(vec![loss], 1, 1, TensorOp::SoftmaxCE { logits, target_idx, vocab })
    }

    // ------------------------------------------------------------------
    // Backward
    // ------------------------------------------------------------------

    /// Accumulate d(loss)/d(node) into every node's gradient. `loss` must be 1x1.
    pub fn backward(&mut self, loss: TID) {
        debug_assert_eq!(self.nodes[loss.0].data.len(), 1);
        self.nodes[loss.0].grad = vec![1.0];

        for i in (0..=loss.0).rev() {
            let has_grad = self.nodes[i].grad.iter().any(|&g| g != 0.0);
            if !has_grad {
                continue;
            }

            let op = self.nodes[i].op.clone();
            match op {
                TensorOp::Leaf => {}

                TensorOp::MatMul { a, b, m, k, n: nn } => {
                    let og = self.nodes[i].grad.clone();
                    let a_d = self.nodes[a.0].data.clone();
                    let b_d = self.nodes[b.0].data.clone();
                    // dA = dOut @ B^T
                    let mut da_buf = vec![0.0f32; m * k];
                    // SAFETY: B^T is read from row-major B[k,nn] with swapped strides.
                    unsafe {
                        matrixmultiply::sgemm(
                            m, nn, k,
                            1.0,
                            og.as_ptr(), nn as isize, 1,
                            b_d.as_ptr(), 1, nn as isize,
                            0.0,
                            da_buf.as_mut_ptr(), k as isize, 1,
                        );
                    }
                    vec_add_inplace(&mut self.nodes[a.0].grad, &da_buf);
                    // dB = A^T @ dOut
                    let mut db_buf = vec![0.0f32; k * nn];
                    // SAFETY: A^T is read from row-major A[m,k] with swapped strides.
                    unsafe {
                        matrixmultiply::sgemm(
                            k, m, nn,
                            1.0,
                            a_d.as_ptr(), 1, k as isize,
                            og.as_ptr(), nn as isize, 1,
                            0.0,
                            db_buf.as_mut_ptr(), nn as isize, 1,
                        );
                    }
                    vec_add_inplace(&mut self.nodes[b.0].grad, &db_buf);
                }

                TensorOp::Add { a, b } => {
                    let g = self.nodes[i].grad.clone();
                    vec_add_inplace(&mut self.nodes[a.0].grad, &g);
                    vec_add_inplace(&mut self.nodes[b.0].grad, &g);
                }

                TensorOp::Mul { a, b } => {
                    let g = self.nodes[i].grad.clone();
                    let a_d = self.nodes[a.0].data.clone();
                    let b_d = self.nodes[b.0].data.clone();
                    for j in 0..g.len() {
                        self.nodes[a.0].grad[j] += g[j] * b_d[j];
                        self.nodes[b.0].grad[j] += g[j] * a_d[j];
                    }
                }

                TensorOp::OneMinus { a } => {
                    let g = self.nodes[i].grad.clone();
                    for (ag, gv) in self.nodes[a.0].grad.iter_mut().zip(g.iter()) {
                        *ag -= gv;
                    }
                }

                TensorOp::Sigmoid { a } => {
                    let g = self.nodes[i].grad.clone();
                    let od = self.nodes[i].data.clone();
                    for j in 0..g.len() {
                        let s = od[j];
                        self.nodes[a.0].grad[j] += g[j] * s * (1.0 - s);
                    }
                }

                TensorOp::Tanh { a } => {
                    let g = self.nodes[i].grad.clone();
                    let od = self.nodes[i].data.clone();
                    for j in 0..g.len() {
                        let t = od[j];
                        self.nodes[a.0].grad[j] += g[j] * (1.0 - t * t);
                    }
                }

                TensorOp::BroadcastAdd { a, bias, rows: rr, cols: cc } => {
                    let g = self.nodes[i].grad.clone();
                    vec_add_inplace(&mut self.nodes[a.0].grad, &g);
                    for ii in 0..rr {
                        let off = ii * cc;
                        vec_add_inplace(&mut self.nodes[bias.0].grad, &g[off..off + cc]);
                    }
                }

                TensorOp::RowSlice { a, row, cols: cc } => {
                    let g = self.nodes[i].grad.clone();
                    let off = row * cc;
                    vec_add_inplace(&mut self.nodes[a.0].grad[off..off + cc], &g);
                }

                TensorOp::SoftmaxCE { logits, target_idx, vocab } => {
                    let gv = self.nodes[i].grad[0];
                    let ld = &self.nodes[logits.0].data;
                    let max_l = vec_max(ld);
                    let exps: Vec<f32> = ld.iter().map(|&x| (x - max_l).exp()).collect();
                    let sum_e: f32 = exps.iter().sum();
                    for j in 0..vocab {
                        let prob = exps[j] / sum_e;
                        let tg = if j == target_idx { prob - 1.0 } else { prob };
                        self.nodes[logits.0].grad[j] += gv * tg;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // row of E -> gated blend of tanh(x @ W + b) and x @ V, summed over two targets
    fn build_loss(g: &mut Graph, p: &Params) -> TID {
        let x = g.row_slice(p.e, 1);
        let xw = g.matmul(x, p.w);
        let pre = g.broadcast_add(xw, p.b);
        let t = g.tanh(pre);
        let xv = g.matmul(x, p.v);
        let gate = g.sigmoid(xv);
        let keep = g.one_minus(gate);
        let mixed = g.mul(t, keep);
        let skip = g.mul(gate, xv);
        let logits = g.add(mixed, skip);
        let l1 = g.softmax_ce(logits, 2);
        let l2 = g.softmax_ce(logits, 0);
        g.add(l1, l2)
    }

    struct Params {
        e: TID,
        w: TID,
        b: TID,
        v: TID,
    }

    impl Params {
        fn all(&self) -> [TID; 4] {
            [self.e, self.w, self.b, self.v]
        }
    }

    fn params(g: &mut Graph) -> Params {
        let e = g.param(vec![0.2, -0.1, 0.4, 0.3, -0.7, 1.1], 2, 3);
        let w = g.param((0..12).map(|i| (i as f32 * 0.37).sin() * 0.5).collect(), 3, 4);
        let b = g.param(vec![0.1, -0.2, 0.05, 0.0], 1, 4);
        let v = g.param((0..12).map(|i| (i as f32 * 0.91).cos() * 0.4).collect(), 3, 4);
        Params { e, w, b, v }
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut g = Graph::new();
        let ps = params(&mut g);
        let loss = build_loss(&mut g, &ps);
        g.backward(loss);

        let eps = 1e-3f32;
        for p in ps.all() {
            let analytic = g.grad(p).to_vec();
            for j in 0..analytic.len() {
                let original = g.data(p).to_vec();

                let mut plus = original.clone();
                plus[j] += eps;
                g.reset();
                g.set_data(p, &plus);
                let lp = build_loss(&mut g, &ps);
                let f_plus = g.data(lp)[0];

                let mut minus = original.clone();
                minus[j] -= eps;
                g.reset();
                g.set_data(p, &minus);
                let lm = build_loss(&mut g, &ps);
                let f_minus = g.data(lm)[0];

                g.reset();
                g.set_data(p, &original);

                let numeric = (f_plus - f_minus) / (2.0 * eps);
                assert!(
                    (numeric - analytic[j]).abs() < 1e-2,
                    "param {:?}[{}]: numeric {} vs analytic {}",
                    p, j, numeric, analytic[j]
                );
            }
        }
    }

    #[test]
    fn test_reset_keeps_params_only() {
        let mut g = Graph::new();
        let ps = params(&mut g);
        assert_eq!(g.len(), 4);
        build_loss(&mut g, &ps);
        assert!(g.len() > 4);
        g.reset();
        assert_eq!(g.len(), 4);
        assert_eq!(g.shape(ps.w), (3, 4));
    }

    #[test]
    fn test_zero_grad_clears_accumulation() {
        let mut g = Graph::new();
        let ps = params(&mut g);
        let loss = build_loss(&mut g, &ps);
        g.backward(loss);
        assert!(g.grad(ps.w).iter().any(|&x| x != 0.0));
        g.zero_grad();
        assert!(g.grad(ps.w).iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_matmul_values() {
        let mut g = Graph::new();
        let a = g.constant(vec![1.0, 2.0, 3.0, 4.0], 2, 2);
        let b = g.constant(vec![5.0, 6.0, 7.0, 8.0], 2, 2);
        let c = g.matmul(a, b);
        assert_eq!(g.data(c), &[19.0, 22.0, 43.0, 50.0]);
        assert_eq!(g.shape(c), (2, 2));
    }

    #[test]
    #[should_panic(expected = "matmul shape")]
    fn test_matmul_rejects_mismatched_inner_dims() {
        let mut g = Graph::new();
        let a = g.constant(vec![0.0; 1 << 12], 1, 1 << 12);
        let b = g.constant(vec![0.0; 64], 8, 8);
        g.matmul(a, b);
    }

    #[test]
    #[should_panic(expected = "does not fill")]
    fn test_node_data_must_match_shape() {
        let mut g = Graph::new();
        g.constant(vec![0.0; 3], 2, 2);
    }

    #[test]
    fn test_softmax_ce_uniform_logits() {
        let mut g = Graph::new();
        let logits = g.constant(vec![0.0; 4], 1, 4);
        let loss = g.softmax_ce(logits, 1);
        assert!((g.data(loss)[0] - 4.0f32.ln()).abs() < 1e-6);
    }
}
