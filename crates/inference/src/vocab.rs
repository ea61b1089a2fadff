//! Ordered byte-string vocabulary. A token's id is its position in the table.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<u8>>", into = "Vec<Vec<u8>>")]
pub struct Vocabulary {
    tokens: Vec<Vec<u8>>,
}

impl Vocabulary {
    /// Builds a vocabulary from tokens in id order. Entries must be distinct.
    pub fn new(tokens: Vec<Vec<u8>>) -> Result<Self> {
        {
            let mut seen = HashSet::with_capacity(tokens.len());
            for (id, token) in tokens.iter().enumerate() {
                ensure!(
                    seen.insert(token.as_slice()),
                    "duplicate vocabulary entry {:?} at id {}",
                    token,
                    id
                );
            }
        }
        Ok(Self { tokens })
    }

    /// All 256 single bytes, id == byte value.
    pub fn byte_level() -> Self {
        Self {
            tokens: (0..=u8::MAX).map(|b| vec![b]).collect(),
        }
    }

    /// Sorted set of distinct bytes occurring in `corpus`.
    pub fn from_corpus(corpus: &[u8]) -> Self {
        let mut present = [false; 256];
        for &b in corpus {
            present[b as usize] = true;
        }
        let tokens = present
            .iter()
            .enumerate()
            .filter(|&(_, &p)| p)
            .map(|(b, _)| vec![b as u8])
            .collect();
        Self { tokens }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let blob = fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        serde_json::from_str(&blob)
            .with_context(|| format!("failed to parse vocabulary {}", path.display()))
    }

    pub fn save_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let blob = serde_json::to_string(self)?;
        fs::write(path, blob)
            .with_context(|| format!("failed to write vocabulary {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token(&self, id: usize) -> Option<&[u8]> {
        self.tokens.get(id).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.tokens.iter().map(Vec::as_slice)
    }
}

impl TryFrom<Vec<Vec<u8>>> for Vocabulary {
    type Error = anyhow::Error;

    fn try_from(tokens: Vec<Vec<u8>>) -> Result<Self> {
        Self::new(tokens)
    }
}

impl From<Vocabulary> for Vec<Vec<u8>> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.tokens
    }
}
