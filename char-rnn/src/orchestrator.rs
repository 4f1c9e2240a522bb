// ============================================================================
// TRAINING LOOP
// ============================================================================

use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::checkpoint::{CheckpointStore, ParameterBlob};
use crate::config::TrainConfig;
use crate::corpus::{Corpus, CorpusSampler};
use crate::error::{CharRnnError, Result};
use crate::generator::{generate, GenerateRequest};
use crate::metrics::{LossCurve, RunningLoss};
use crate::model::{GruModel, ModelShape};
use crate::tensor::Graph;
use crate::trainer::TrainingSession;
use crate::vocab::Vocabulary;

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub loss_curve: LossCurve,
    pub last_loss: f32,
    pub epochs_run: usize,
    /// Most recent progress sample, if any epoch hit `print_delay`.
    pub last_sample: Option<String>,
    pub elapsed: Duration,
}

/// `"{m}m {s}s"`
pub fn format_elapsed(d: Duration) -> String {
    let s = d.as_secs();
    format!("{}m {}s", s / 60, s % 60)
}

/// `"[{elapsed} ({epoch} {percent:.1}%) {loss:.4}]"`
fn progress_line(elapsed: Duration, epoch: usize, num_epochs: usize, loss: f32) -> String {
    let pct = epoch as f32 / num_epochs as f32 * 100.0;
    format!("[{} ({} {:.1}%) {:.4}]", format_elapsed(elapsed), epoch, pct, loss)
}

/// One random window per epoch, `1..=num_epochs`. Progress lines and a
/// sample every `print_delay` epochs, a loss-curve point every `plot_delay`,
/// and a single checkpoint save once the loop finishes. The first error
/// aborts the run and nothing is saved.
pub fn run_training<S: CheckpointStore + ?Sized>(
    config: &TrainConfig,
    vocab: &Vocabulary,
    corpus: &Corpus,
    store: &S,
) -> Result<(TrainingSession<GruModel>, TrainingReport)> {
    config.validate()?;
    config.validate_prime(vocab)?;
    let sampler = CorpusSampler::new(config.chunk_len)?;
    if corpus.len() <= config.chunk_len {
        return Err(CharRnnError::InsufficientCorpus { len: corpus.len(), chunk_len: config.chunk_len });
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut g = Graph::new();
    let model = GruModel::new(config.shape(vocab.len()), config.dropout_prob, &mut g, &mut rng)?;
    tracing::info!(
        "Training {} params | hidden={} layers={} vocab={} chunk={} lr={} epochs={}",
        model.total_params(&g),
        config.hidden_size,
        config.num_layers,
        vocab.len(),
        config.chunk_len,
        config.learning_rate,
        config.num_epochs
    );
    let mut session = TrainingSession::new(g, model, config.learning_rate, config.weight_decay)
        .with_max_grad_norm(config.max_grad_norm);

    let request = GenerateRequest::new(&config.prime, config.predict_len, config.temperature);
    let mut curve = LossCurve::new();
    let mut running = RunningLoss::default();
    let mut last_loss = f32::NAN;
    let mut last_sample = None;
    let t0 = Instant::now();

    for epoch in 1..=config.num_epochs {
        let window = sampler.sample_window(corpus, &mut rng)?;
        let loss = session.train_step(&window, &mut rng)?;
        running.add(loss);
        last_loss = loss;

        if epoch % config.print_delay == 0 {
            tracing::info!("{}", progress_line(t0.elapsed(), epoch, config.num_epochs, loss));
            let (g, model) = session.split();
            let sample = generate(g, model, vocab, &request, &mut rng)?;
            tracing::info!("{}", sample);
            last_sample = Some(sample);
        }
        if epoch % config.plot_delay == 0 {
            curve.push(epoch, running.take_average());
        }
    }

    store.save(&ParameterBlob::capture(session.graph(), session.model()))?;
    let elapsed = t0.elapsed();
    tracing::info!("Done in {} | last loss {:.4}", format_elapsed(elapsed), last_loss);

    let report = TrainingReport {
        loss_curve: curve,
        last_loss,
        epochs_run: config.num_epochs,
        last_sample,
        elapsed,
    };
    Ok((session, report))
}

/// Build a model of `shape` and fill it from `store`.
pub fn load_trained<S: CheckpointStore + ?Sized>(shape: ModelShape, store: &S) -> Result<(Graph, GruModel)> {
    let mut g = Graph::new();
    let model = GruModel::zeroed(shape, 0.0, &mut g)?;
    store.load()?.restore_into(&mut g, &model)?;
    Ok((g, model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;

    fn small_config() -> TrainConfig {
        TrainConfig {
            chunk_len: 8,
            hidden_size: 8,
            num_layers: 1,
            dropout_prob: 0.1,
            learning_rate: 0.01,
            num_epochs: 12,
            print_delay: 5,
            plot_delay: 4,
            temperature: 0.8,
            predict_len: 6,
            prime: "ab".into(),
            ..TrainConfig::default()
        }
    }

    fn data() -> (Vocabulary, Corpus) {
        let text = "abcab cabca bcabc ".repeat(6);
        let vocab = Vocabulary::from_text(&text).unwrap();
        let corpus = Corpus::new(&text, &vocab).unwrap();
        (vocab, corpus)
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "0m 0s");
        assert_eq!(format_elapsed(Duration::from_secs(125)), "2m 5s");
    }

    #[test]
    fn test_progress_line_keeps_fractional_percent() {
        let line = progress_line(Duration::from_secs(61), 5, 12, 1.23456);
        assert_eq!(line, "[1m 1s (5 41.7%) 1.2346]");
        assert_eq!(progress_line(Duration::ZERO, 12, 12, 0.5), "[0m 0s (12 100.0%) 0.5000]");
    }

    #[test]
    fn test_saves_once_and_records_curve() {
        let (vocab, corpus) = data();
        let store = MemoryCheckpointStore::new();
        let (_, report) = run_training(&small_config(), &vocab, &corpus, &store).unwrap();

        assert_eq!(store.save_count(), 1);
        assert_eq!(report.epochs_run, 12);
        assert_eq!(report.loss_curve.len(), 12 / 4);
        let epochs: Vec<usize> = report.loss_curve.points().iter().map(|p| p.epoch).collect();
        assert_eq!(epochs, vec![4, 8, 12]);
        assert!(report.last_loss.is_finite());

        let sample = report.last_sample.unwrap();
        assert!(sample.starts_with("ab"));
        assert_eq!(sample.chars().count(), 2 + 6);
    }

    #[test]
    fn test_same_seed_same_run() {
        let (vocab, corpus) = data();
        let (_, a) = run_training(&small_config(), &vocab, &corpus, &MemoryCheckpointStore::new()).unwrap();
        let (_, b) = run_training(&small_config(), &vocab, &corpus, &MemoryCheckpointStore::new()).unwrap();
        assert_eq!(a.loss_curve, b.loss_curve);
        assert_eq!(a.last_sample, b.last_sample);
    }

    #[test]
    fn test_errors_abort_without_saving() {
        let (vocab, corpus) = data();
        let store = MemoryCheckpointStore::new();

        let long_chunk = TrainConfig { chunk_len: corpus.len(), ..small_config() };
        assert!(matches!(
            run_training(&long_chunk, &vocab, &corpus, &store),
            Err(CharRnnError::InsufficientCorpus { .. })
        ));

        let bad_prime = TrainConfig { prime: "xyz".into(), ..small_config() };
        assert!(matches!(
            run_training(&bad_prime, &vocab, &corpus, &store),
            Err(CharRnnError::UnknownCharacter('x'))
        ));
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn test_load_trained_matches_session() {
        let (vocab, corpus) = data();
        let store = MemoryCheckpointStore::new();
        let config = small_config();
        let (mut session, _) = run_training(&config, &vocab, &corpus, &store).unwrap();

        let (mut g, model) = load_trained(config.shape(vocab.len()), &store).unwrap();
        let req = GenerateRequest::new("ab", 20, 0.5);
        let restored = generate(&mut g, &model, &vocab, &req, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let (sg, sm) = session.split();
        let original = generate(sg, sm, &vocab, &req, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert_eq!(restored, original);
    }
}
