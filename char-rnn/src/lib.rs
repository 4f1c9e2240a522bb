//! Character-level GRU language model on a small reverse-mode autodiff tape.
//!
//! Train with [`run_training`], sample with [`generate`], persist with a
//! [`CheckpointStore`].

pub mod checkpoint;
pub mod config;
pub mod corpus;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod orchestrator;
pub mod tensor;
pub mod trainer;
pub mod vocab;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, ParameterBlob};
pub use config::TrainConfig;
pub use corpus::{Corpus, CorpusSampler, Window};
pub use error::{CharRnnError, Result};
pub use generator::{generate, GenerateRequest};
pub use metrics::LossCurve;
pub use model::{GruModel, HiddenState, Mode, ModelShape, SequenceModel};
pub use orchestrator::{load_trained, run_training, TrainingReport};
pub use tensor::Graph;
pub use trainer::TrainingSession;
pub use vocab::Vocabulary;

/// Checkpoint path used when none is given.
pub const DEFAULT_CHECKPOINT: &str = "./textgen_model.bin";
