// ============================================================================
// CONFIG
// ============================================================================

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CharRnnError, Result};
use crate::model::ModelShape;
use crate::vocab::Vocabulary;

/// Hyperparameters for one training run. Missing JSON fields take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub chunk_len: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub dropout_prob: f32,
    pub learning_rate: f32,
    pub num_epochs: usize,
    pub print_delay: usize,
    pub plot_delay: usize,
    pub temperature: f32,
    pub predict_len: usize,
    pub prime: String,
    pub seed: u64,
    pub weight_decay: f32,
    pub max_grad_norm: Option<f32>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            chunk_len: 200,
            hidden_size: 100,
            num_layers: 2,
            dropout_prob: 0.2,
            learning_rate: 0.002,
            num_epochs: 200,
            print_delay: 100,
            plot_delay: 100,
            temperature: 0.8,
            predict_len: 100,
            prime: "A".to_string(),
            seed: 42,
            weight_decay: 0.0,
            max_grad_norm: None,
        }
    }
}

fn invalid(msg: String) -> Result<()> {
    Err(CharRnnError::InvalidConfig(msg))
}

impl TrainConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: TrainConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Range-checks every option; reports the first violation.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("chunk_len", self.chunk_len),
            ("hidden_size", self.hidden_size),
            ("num_layers", self.num_layers),
            ("num_epochs", self.num_epochs),
            ("print_delay", self.print_delay),
            ("plot_delay", self.plot_delay),
        ];
        for (name, value) in positive {
            if value == 0 {
                return invalid(format!("{} must be > 0", name));
            }
        }
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return invalid(format!("dropout_prob must be in [0, 1), got {}", self.dropout_prob));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return invalid(format!("learning_rate must be > 0, got {}", self.learning_rate));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(CharRnnError::InvalidTemperature(self.temperature));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return invalid(format!("weight_decay must be >= 0, got {}", self.weight_decay));
        }
        if let Some(n) = self.max_grad_norm {
            if !(n.is_finite() && n > 0.0) {
                return invalid(format!("max_grad_norm must be > 0, got {}", n));
            }
        }
        if self.prime.is_empty() {
            return Err(CharRnnError::EmptyPrime);
        }
        Ok(())
    }

    pub fn validate_prime(&self, vocab: &Vocabulary) -> Result<()> {
        if self.prime.is_empty() {
            return Err(CharRnnError::EmptyPrime);
        }
        vocab.encode(&self.prime).map(|_| ())
    }

    pub fn shape(&self, vocab_size: usize) -> ModelShape {
        ModelShape { vocab_size, hidden_size: self.hidden_size, num_layers: self.num_layers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let c = TrainConfig::default();
        c.validate().unwrap();
        c.validate_prime(&Vocabulary::printable()).unwrap();
        assert_eq!(c.chunk_len, 200);
        assert_eq!(c.prime, "A");
    }

    #[test]
    fn test_rejects_each_bad_option() {
        let cases: [fn(&mut TrainConfig); 13] = [
            |c| c.chunk_len = 0,
            |c| c.hidden_size = 0,
            |c| c.num_layers = 0,
            |c| c.num_epochs = 0,
            |c| c.print_delay = 0,
            |c| c.plot_delay = 0,
            |c| c.dropout_prob = 1.0,
            |c| c.dropout_prob = -0.1,
            |c| c.learning_rate = 0.0,
            |c| c.temperature = 0.0,
            |c| c.weight_decay = -1.0,
            |c| c.max_grad_norm = Some(0.0),
            |c| c.prime = String::new(),
        ];
        for (i, tweak) in cases.into_iter().enumerate() {
            let mut c = TrainConfig::default();
            tweak(&mut c);
            assert!(c.validate().is_err(), "case {} accepted", i);
        }
    }

    #[test]
    fn test_prime_must_be_in_vocabulary() {
        let c = TrainConfig { prime: "ab$".into(), ..TrainConfig::default() };
        let vocab = Vocabulary::new(['a', 'b']).unwrap();
        assert!(matches!(c.validate_prime(&vocab), Err(CharRnnError::UnknownCharacter('$'))));
    }

    #[test]
    fn test_json_partial_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.json");
        fs::write(&path, r#"{"hidden_size": 32, "num_epochs": 10, "max_grad_norm": 1.0}"#).unwrap();
        let c = TrainConfig::from_json_file(&path).unwrap();
        assert_eq!(c.hidden_size, 32);
        assert_eq!(c.num_epochs, 10);
        assert_eq!(c.max_grad_norm, Some(1.0));
        assert_eq!(c.chunk_len, 200);
    }

    #[test]
    fn test_json_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{ hidden_size: ").unwrap();
        assert!(matches!(TrainConfig::from_json_file(&path), Err(CharRnnError::ConfigFormat(_))));
    }
}
