// ============================================================================
// CLI
// ============================================================================

use std::borrow::Cow;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use char_rnn::{
    generate, load_trained, run_training, Corpus, FileCheckpointStore, GenerateRequest, ModelShape,
    TrainConfig, Vocabulary, DEFAULT_CHECKPOINT,
};

#[derive(Parser, Debug)]
#[command(name = "char-rnn", version, about = "Train a character-level GRU and sample text from it")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train on a plain-text corpus and save the parameters
    Train(TrainArgs),
    /// Load saved parameters and sample text
    Generate(GenerateArgs),
}

/// Flags override `--config`, which overrides the built-in defaults.
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long)]
    pub corpus: PathBuf,
    #[arg(long, default_value = DEFAULT_CHECKPOINT)]
    pub checkpoint: PathBuf,
    /// JSON file with any subset of the training options
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Write the averaged loss curve here as CSV
    #[arg(long)]
    pub loss_csv: Option<PathBuf>,

    #[arg(long)]
    pub chunk_len: Option<usize>,
    #[arg(long)]
    pub hidden_size: Option<usize>,
    #[arg(long)]
    pub num_layers: Option<usize>,
    #[arg(long)]
    pub dropout_prob: Option<f32>,
    #[arg(long)]
    pub learning_rate: Option<f32>,
    #[arg(long)]
    pub num_epochs: Option<usize>,
    #[arg(long)]
    pub print_delay: Option<usize>,
    #[arg(long)]
    pub plot_delay: Option<usize>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub predict_len: Option<usize>,
    #[arg(long)]
    pub prime: Option<String>,
    #[arg(long)]
    pub seed: Option<u64>,
    #[arg(long)]
    pub weight_decay: Option<f32>,
    #[arg(long)]
    pub max_grad_norm: Option<f32>,
}

impl TrainArgs {
    fn resolve_config(&self) -> Result<TrainConfig> {
        let mut c = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)
                .with_context(|| format!("reading config '{}'", path.display()))?,
            None => TrainConfig::default(),
        };
        macro_rules! apply {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field.clone() { c.$field = v; })*
            };
        }
        apply!(
            chunk_len, hidden_size, num_layers, dropout_prob, learning_rate, num_epochs,
            print_delay, plot_delay, temperature, predict_len, prime, seed, weight_decay
        );
        if self.max_grad_norm.is_some() {
            c.max_grad_norm = self.max_grad_norm;
        }
        Ok(c)
    }
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    #[arg(long, default_value = DEFAULT_CHECKPOINT)]
    pub checkpoint: PathBuf,
    #[arg(long, default_value = "A")]
    pub prime: String,
    #[arg(long, default_value_t = 100)]
    pub predict_len: usize,
    #[arg(long, default_value_t = 0.8)]
    pub temperature: f32,
    /// Must match the saved model
    #[arg(long, default_value_t = 100)]
    pub hidden_size: usize,
    /// Must match the saved model
    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args) => run_train(args),
            Commands::Generate(args) => run_generate(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = args.resolve_config()?;
    let bytes = fs::read(&args.corpus)
        .with_context(|| format!("reading corpus '{}'", args.corpus.display()))?;
    let vocab = Vocabulary::printable();
    let text = normalize_corpus(&bytes, &vocab);
    tracing::info!("Loaded corpus '{}' ({} chars)", args.corpus.display(), text.len());

    let corpus = Corpus::new(&text, &vocab).context("encoding corpus")?;
    let store = FileCheckpointStore::new(&args.checkpoint);
    let (_, report) = run_training(&config, &vocab, &corpus, &store).context("training failed")?;

    if let Some(path) = &args.loss_csv {
        report
            .loss_curve
            .write_csv(path)
            .with_context(|| format!("writing loss curve '{}'", path.display()))?;
    }
    println!(
        "Trained {} epochs, last loss {:.4}. Saved to {}",
        report.epochs_run,
        report.last_loss,
        store.path().display()
    );
    Ok(())
}

/// Decode as UTF-8, or as ISO-8859-1 when that fails, transliterate to ASCII
/// and drop whatever the vocabulary still lacks.
fn normalize_corpus(bytes: &[u8], vocab: &Vocabulary) -> String {
    let decoded = match std::str::from_utf8(bytes) {
        Ok(s) => Cow::Borrowed(s),
        Err(_) => Cow::Owned(bytes.iter().map(|&b| b as char).collect::<String>()),
    };
    let ascii = deunicode::deunicode_with_tofu(&decoded, "");
    let total = ascii.chars().count();
    let kept: String = ascii.chars().filter(|&c| vocab.contains(c)).collect();
    if kept.len() < total {
        tracing::warn!("Dropped {} characters outside the vocabulary", total - kept.len());
    }
    kept
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let vocab = Vocabulary::printable();
    let shape = ModelShape {
        vocab_size: vocab.len(),
        hidden_size: args.hidden_size,
        num_layers: args.num_layers,
    };
    let store = FileCheckpointStore::new(&args.checkpoint);
    let (mut g, model) = load_trained(shape, &store)
        .with_context(|| format!("loading checkpoint '{}'", args.checkpoint.display()))?;

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let request = GenerateRequest::new(&args.prime, args.predict_len, args.temperature);
    let text = generate(&mut g, &model, &vocab, &request, &mut rng)?;
    println!("{}", text);
    Ok(())
}
