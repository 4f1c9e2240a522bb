// ============================================================================
// CORPUS & WINDOW SAMPLING
// ============================================================================

use rand::Rng;

use crate::error::{CharRnnError, Result};
use crate::vocab::Vocabulary;

/// Encoded training text. Every character is known to the vocabulary it
/// was built with.
#[derive(Debug, Clone)]
pub struct Corpus {
    indices: Vec<usize>,
}

impl Corpus {
    pub fn new(text: &str, vocab: &Vocabulary) -> Result<Self> {
        Ok(Corpus { indices: vocab.encode(text)? })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

/// Input/target pair: `target` is `input` shifted left by one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub input: Vec<usize>,
    pub target: Vec<usize>,
}

impl Window {
    /// Split a chunk of `n + 1` indices into "all but last" / "all but first".
    pub fn from_chunk(chunk: &[usize]) -> Result<Self> {
        if chunk.len() < 2 {
            return Err(CharRnnError::InvalidConfig(format!(
                "a window needs at least 2 indices, got {}",
                chunk.len()
            )));
        }
        Ok(Window {
            input: chunk[..chunk.len() - 1].to_vec(),
            target: chunk[1..].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

/// Draws random contiguous chunks of `chunk_len + 1` indices.
#[derive(Debug, Clone, Copy)]
pub struct CorpusSampler {
    chunk_len: usize,
}

impl CorpusSampler {
    pub fn new(chunk_len: usize) -> Result<Self> {
        if chunk_len == 0 {
            return Err(CharRnnError::InvalidConfig("chunk_len must be > 0".into()));
        }
        Ok(CorpusSampler { chunk_len })
    }

    /// Start offset is uniform over `[0, L - chunk_len)`, so the chunk always
    /// ends inside the corpus.
    pub fn sample<'c, R: Rng + ?Sized>(&self, corpus: &'c Corpus, rng: &mut R) -> Result<&'c [usize]> {
        let len = corpus.len();
        if len <= self.chunk_len {
            return Err(CharRnnError::InsufficientCorpus { len, chunk_len: self.chunk_len });
        }
        let start = rng.gen_range(0..len - self.chunk_len);
        Ok(&corpus.indices[start..start + self.chunk_len + 1])
    }

    pub fn sample_window<R: Rng + ?Sized>(&self, corpus: &Corpus, rng: &mut R) -> Result<Window> {
        Window::from_chunk(self.sample(corpus, rng)?)
    }
}
