// ============================================================================
// GENERATION
// ============================================================================

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{CharRnnError, Result};
use crate::model::{HiddenValues, Mode, SequenceModel};
use crate::tensor::{vec_max, Graph};
use crate::vocab::Vocabulary;

#[derive(Debug, Clone, Copy)]
pub struct GenerateRequest<'a> {
    pub prime: &'a str,
    pub predict_len: usize,
    pub temperature: f32,
}

impl<'a> GenerateRequest<'a> {
    pub fn new(prime: &'a str, predict_len: usize, temperature: f32) -> Self {
        GenerateRequest { prime, predict_len, temperature }
    }

    pub fn validate(&self, vocab: &Vocabulary) -> Result<()> {
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(CharRnnError::InvalidTemperature(self.temperature));
        }
        if self.prime.is_empty() {
            return Err(CharRnnError::EmptyPrime);
        }
        if let Some(c) = self.prime.chars().find(|&c| !vocab.contains(c)) {
            return Err(CharRnnError::UnknownCharacter(c));
        }
        Ok(())
    }
}

/// Warm the hidden state up on every prime character but the last, then
/// sample `predict_len` characters one at a time, feeding each back in.
/// Returns the prime followed by the sampled characters.
///
/// Runs without dropout. The tape is reset after every step and the hidden
/// state carried between steps as plain values.
pub fn generate<M, R>(
    g: &mut Graph,
    model: &M,
    vocab: &Vocabulary,
    request: &GenerateRequest<'_>,
    rng: &mut R,
) -> Result<String>
where
    M: SequenceModel,
    R: Rng + ?Sized,
{
    request.validate(vocab)?;
    let vocab_size = model.shape().vocab_size;
    if vocab_size != vocab.len() {
        return Err(CharRnnError::IncompatibleModel(format!(
            "model emits {} classes, vocabulary has {} characters",
            vocab_size,
            vocab.len()
        )));
    }

    let prime = vocab.encode(request.prime)?;
    let (&last, warmup) = prime.split_last().ok_or(CharRnnError::EmptyPrime)?;

    g.reset();
    let mut hidden = model.init_hidden(g).detach(g);
    for &idx in warmup {
        hidden = advance(g, model, idx, &hidden)?.1;
    }

    let mut out = String::with_capacity(request.prime.len() + request.predict_len);
    out.push_str(request.prime);
    let mut current = last;
    for _ in 0..request.predict_len {
        let (logits, next) = advance(g, model, current, &hidden)?;
        hidden = next;
        current = sample_index(&logits, request.temperature, rng)?;
        out.push(vocab.char_at(current)?);
    }
    g.reset();
    Ok(out)
}

fn advance<M: SequenceModel>(
    g: &mut Graph,
    model: &M,
    token: usize,
    hidden: &HiddenValues,
) -> Result<(Vec<f32>, HiddenValues)> {
    g.reset();
    let h = hidden.attach(g);
    let (logits, next) = model.step(g, token, &h, Mode::Eval)?;
    Ok((g.data(logits).to_vec(), next.detach(g)))
}

/// Draw one index with weight `exp((l - max) / T)`.
pub fn sample_index<R: Rng + ?Sized>(logits: &[f32], temperature: f32, rng: &mut R) -> Result<usize> {
    if logits.iter().any(|l| !l.is_finite()) {
        return Err(CharRnnError::NumericInstability("generation logits".into()));
    }
    let max = vec_max(logits);
    let weights: Vec<f32> = logits.iter().map(|&l| ((l - max) / temperature).exp()).collect();
    let dist = WeightedIndex::new(&weights)
        .map_err(|e| CharRnnError::NumericInstability(format!("sampling weights: {}", e)))?;
    Ok(dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GruModel, HiddenState, ModelShape};
    use crate::tensor::TID;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::cell::Cell;

    /// Emits the same logits every step and counts how often it was called.
    struct FixedLogits {
        logits: Vec<f32>,
        calls: Cell<usize>,
    }

    impl FixedLogits {
        fn new(logits: Vec<f32>) -> Self {
            FixedLogits { logits, calls: Cell::new(0) }
        }
    }

    impl SequenceModel for FixedLogits {
        fn shape(&self) -> ModelShape {
            ModelShape { vocab_size: self.logits.len(), hidden_size: 1, num_layers: 1 }
        }

        fn step(&self, g: &mut Graph, _token: usize, hidden: &HiddenState, _mode: Mode<'_>)
            -> Result<(TID, HiddenState)> {
            self.calls.set(self.calls.get() + 1);
            let logits = g.constant(self.logits.clone(), 1, self.logits.len());
            Ok((logits, hidden.clone()))
        }

        fn parameters(&self) -> Vec<TID> {
            Vec::new()
        }
    }

    fn abc() -> Vocabulary {
        Vocabulary::new(['a', 'b', 'c']).unwrap()
    }

    #[test]
    fn test_zero_predict_len_returns_prime_without_stepping() {
        let model = FixedLogits::new(vec![0.0, 0.0, 0.0]);
        let mut g = Graph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = generate(&mut g, &model, &abc(), &GenerateRequest::new("a", 0, 0.8), &mut rng).unwrap();
        assert_eq!(out, "a");
        assert_eq!(model.calls.get(), 0);
    }

    #[test]
    fn test_warmup_skips_last_prime_character() {
        let model = FixedLogits::new(vec![0.0, 0.0, 0.0]);
        let mut g = Graph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let out = generate(&mut g, &model, &abc(), &GenerateRequest::new("abc", 4, 1.0), &mut rng).unwrap();
        assert_eq!(out.chars().count(), 7);
        assert!(out.starts_with("abc"));
        assert_eq!(model.calls.get(), 2 + 4);
    }

    #[test]
    fn test_low_temperature_is_argmax() {
        let model = FixedLogits::new(vec![0.1, 2.0, 1.9]);
        let mut g = Graph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let out = generate(&mut g, &model, &abc(), &GenerateRequest::new("a", 50, 1e-4), &mut rng).unwrap();
        assert_eq!(out, format!("a{}", "b".repeat(50)));
    }

    #[test]
    fn test_high_temperature_spreads_samples() {
        let logits = [0.1, 2.0, 1.9];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let mut seen = [0usize; 3];
        for _ in 0..600 {
            seen[sample_index(&logits, 50.0, &mut rng).unwrap()] += 1;
        }
        assert!(seen.iter().all(|&n| n > 100), "{:?}", seen);
    }

    #[test]
    fn test_same_seed_same_text() {
        let vocab = Vocabulary::printable();
        let mut g = Graph::new();
        let mut init = ChaCha8Rng::seed_from_u64(21);
        let shape = ModelShape { vocab_size: vocab.len(), hidden_size: 12, num_layers: 2 };
        let model = GruModel::new(shape, 0.3, &mut g, &mut init).unwrap();
        let req = GenerateRequest::new("Th", 40, 0.8);

        let a = generate(&mut g, &model, &vocab, &req, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        let b = generate(&mut g, &model, &vocab, &req, &mut ChaCha8Rng::seed_from_u64(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.chars().count(), 42);
        assert_eq!(g.len(), model.parameters().len());
    }

    #[test]
    fn test_rejects_bad_requests() {
        let model = FixedLogits::new(vec![0.0, 0.0, 0.0]);
        let mut g = Graph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let vocab = abc();
        let mut run = |prime, temp| generate(&mut g, &model, &vocab, &GenerateRequest::new(prime, 3, temp), &mut rng);

        assert!(matches!(run("a", 0.0), Err(CharRnnError::InvalidTemperature(_))));
        assert!(matches!(run("a", -1.0), Err(CharRnnError::InvalidTemperature(_))));
        assert!(matches!(run("a", f32::NAN), Err(CharRnnError::InvalidTemperature(_))));
        assert!(matches!(run("", 1.0), Err(CharRnnError::EmptyPrime)));
        assert!(matches!(run("a$", 1.0), Err(CharRnnError::UnknownCharacter('$'))));
    }

    #[test]
    fn test_non_finite_logits() {
        let model = FixedLogits::new(vec![0.0, f32::INFINITY, 0.0]);
        let mut g = Graph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            generate(&mut g, &model, &abc(), &GenerateRequest::new("a", 1, 1.0), &mut rng),
            Err(CharRnnError::NumericInstability(_))
        ));
    }

    #[test]
    fn test_vocabulary_must_match_model() {
        let model = FixedLogits::new(vec![0.0; 4]);
        let mut g = Graph::new();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            generate(&mut g, &model, &abc(), &GenerateRequest::new("a", 1, 1.0), &mut rng),
            Err(CharRnnError::IncompatibleModel(_))
        ));
    }
}
