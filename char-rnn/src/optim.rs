// ============================================================================
// ADAMW OPTIMIZER
// ============================================================================

use crate::tensor::{Graph, TID};

pub struct AdamW {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    weight_decay: f32,
    t: usize,
    ids: Vec<TID>,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl AdamW {
    /// `weight_decay = 0.0` is plain Adam.
    pub fn new(ids: Vec<TID>, g: &Graph, lr: f32, weight_decay: f32) -> Self {
        let m = ids.iter().map(|&t| vec![0.0; g.data(t).len()]).collect();
        let v = ids.iter().map(|&t| vec![0.0; g.data(t).len()]).collect();
        AdamW { lr, beta1: 0.9, beta2: 0.999, eps: 1e-8, weight_decay, t: 0, ids, m, v }
    }

    pub fn steps_taken(&self) -> usize {
        self.t
    }

    pub fn step(&mut self, g: &mut Graph) {
        self.t += 1;
        let t = self.t as f32;
        let bc1 = 1.0 - self.beta1.powf(t);
        let bc2 = 1.0 - self.beta2.powf(t);

        for (idx, &tid) in self.ids.iter().enumerate() {
            let (data, grad) = g.param_slots(tid);
            let pm = &mut self.m[idx];
            let pv = &mut self.v[idx];
            for j in 0..data.len() {
                let gr = grad[j];
                if gr == 0.0 && pm[j] == 0.0 {
                    continue;
                }
                pm[j] = self.beta1 * pm[j] + (1.0 - self.beta1) * gr;
                pv[j] = self.beta2 * pv[j] + (1.0 - self.beta2) * gr * gr;
                let m_hat = pm[j] / bc1;
                let v_hat = pv[j] / bc2;
                data[j] -= self.lr * self.weight_decay * data[j]
                    + self.lr * m_hat / (v_hat.sqrt() + self.eps);
            }
        }
    }
}

/// Rescale gradients so their global L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(g: &mut Graph, ids: &[TID], max_norm: f32) -> f32 {
    let total: f32 = ids
        .iter()
        .flat_map(|&t| g.grad(t).iter())
        .map(|gv| gv * gv)
        .sum::<f32>()
        .sqrt();
    if total > max_norm {
        let s = max_norm / total;
        for &t in ids {
            g.grad_mut(t).iter_mut().for_each(|gv| *gv *= s);
        }
    }
    total
}
