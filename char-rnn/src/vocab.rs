// ============================================================================
// VOCABULARY
// ============================================================================

use std::collections::HashMap;

use crate::error::{CharRnnError, Result};

const DIGITS: &str = "0123456789";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const PUNCTUATION: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";
const WHITESPACE: &str = " \t\n\r\x0b\x0c";

/// Fixed, ordered alphabet. `index(char_at(i)) == i` for every `i < len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    chars: Vec<char>,
    char_to_idx: HashMap<char, usize>,
}

impl Vocabulary {
    pub fn new(chars: impl IntoIterator<Item = char>) -> Result<Self> {
        let chars: Vec<char> = chars.into_iter().collect();
        if chars.is_empty() {
            return Err(CharRnnError::EmptyVocabulary);
        }
        let mut char_to_idx = HashMap::with_capacity(chars.len());
        for (i, &c) in chars.iter().enumerate() {
            if char_to_idx.insert(c, i).is_some() {
                return Err(CharRnnError::DuplicateCharacter(c));
            }
        }
        Ok(Vocabulary { chars, char_to_idx })
    }

    /// The 100 printable ASCII characters, digits first, whitespace last.
    pub fn printable() -> Self {
        let chars: Vec<char> = [DIGITS, LOWERCASE, UPPERCASE, PUNCTUATION, WHITESPACE]
            .iter()
            .flat_map(|s| s.chars())
            .collect();
        let char_to_idx = chars.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Vocabulary { chars, char_to_idx }
    }

    /// Sorted distinct characters of `text`.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut chars: Vec<char> = text.chars().collect();
        chars.sort_unstable();
        chars.dedup();
        Self::new(chars)
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, c: char) -> bool {
        self.char_to_idx.contains_key(&c)
    }

    pub fn index(&self, c: char) -> Result<usize> {
        self.char_to_idx
            .get(&c)
            .copied()
            .ok_or(CharRnnError::UnknownCharacter(c))
    }

    pub fn char_at(&self, i: usize) -> Result<char> {
        self.chars
            .get(i)
            .copied()
            .ok_or(CharRnnError::IndexOutOfRange { index: i, len: self.chars.len() })
    }

    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars().map(|c| self.index(c)).collect()
    }

    pub fn decode(&self, indices: &[usize]) -> Result<String> {
        indices.iter().map(|&i| self.char_at(i)).collect()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}
