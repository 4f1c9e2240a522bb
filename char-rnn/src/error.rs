// ============================================================================
// ERRORS
// ============================================================================

use thiserror::Error;

/// Every failure the library can report. All of them abort the operation
/// that raised them (one train step, one generation request, one load).
#[derive(Error, Debug)]
pub enum CharRnnError {
    #[error("character {0:?} is not in the vocabulary")]
    UnknownCharacter(char),

    #[error("index {index} is out of range for a vocabulary of {len} characters")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("corpus has {len} characters, need more than chunk_len={chunk_len}")]
    InsufficientCorpus { len: usize, chunk_len: usize },

    #[error("temperature must be a finite value > 0, got {0}")]
    InvalidTemperature(f32),

    #[error("checkpoint does not match the configured model: {0}")]
    IncompatibleModel(String),

    #[error("non-finite value in {0}")]
    NumericInstability(String),

    #[error("priming string is empty")]
    EmptyPrime,

    #[error("vocabulary must contain at least one character")]
    EmptyVocabulary,

    #[error("character {0:?} appears more than once in the vocabulary")]
    DuplicateCharacter(char),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding: {0}")]
    Checkpoint(#[from] bincode::Error),

    #[error("config format: {0}")]
    ConfigFormat(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CharRnnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CharRnnError::IndexOutOfRange { index: 7, len: 3 };
        assert_eq!(
            err.to_string(),
            "index 7 is out of range for a vocabulary of 3 characters"
        );
        let err = CharRnnError::UnknownCharacter('$');
        assert_eq!(err.to_string(), "character '$' is not in the vocabulary");
    }

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(CharRnnError::Io(_))));
    }
}
