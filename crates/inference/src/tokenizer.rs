//! Byte-level tokenizer over a [`Vocabulary`].
//!
//! Encoding scans the vocabulary in id order for each input byte and keeps
//! the first entry equal to that single byte. Bytes with no match are
//! dropped. Entries longer than one byte can never be selected by `encode`;
//! they are still emitted by `decode`.

use crate::vocab::Vocabulary;
use anyhow::{Context, Result};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ByteTokenizer {
    vocab: Arc<Vocabulary>,
}

impl ByteTokenizer {
    pub fn new(vocab: Arc<Vocabulary>) -> Self {
        Self { vocab }
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn encode(&self, text: &str) -> Vec<usize> {
        text.as_bytes()
            .iter()
            .filter_map(|&byte| self.lookup(byte))
            .collect()
    }

    fn lookup(&self, byte: u8) -> Option<usize> {
        self.vocab
            .iter()
            .position(|token| token.len() == 1 && token[0] == byte)
    }

    /// Concatenates the byte-strings of `ids`.
    pub fn decode_bytes(&self, ids: &[usize]) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(ids.len());
        for &id in ids {
            let token = self.vocab.token(id).with_context(|| {
                format!(
                    "token id {} outside vocabulary of {}",
                    id,
                    self.vocab.len()
                )
            })?;
            bytes.extend_from_slice(token);
        }
        Ok(bytes)
    }

    /// Decodes `ids` to text; invalid UTF-8 becomes U+FFFD.
    pub fn decode(&self, ids: &[usize]) -> Result<String> {
        let bytes = self.decode_bytes(ids)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenizer(tokens: &[&str]) -> ByteTokenizer {
        let vocab = Vocabulary::new(tokens.iter().map(|t| t.as_bytes().to_vec()).collect())
            .expect("vocab");
        ByteTokenizer::new(Arc::new(vocab))
    }

    #[test]
    fn repeated_byte_encodes_to_repeated_id() {
        let tok = tokenizer(&["x", "a", "b"]);
        assert_eq!(tok.encode("bbbb"), vec![2, 2, 2, 2]);
    }

    #[test]
    fn unmatched_bytes_are_skipped() {
        let tok = tokenizer(&["h", "i"]);
        assert_eq!(tok.encode("h-i!"), vec![0, 1]);
        assert!(tok.encode("???").is_empty());
        assert!(tok.encode("").is_empty());
    }

    #[test]
    fn round_trip_over_vocabulary_bytes() {
        let tok = ByteTokenizer::new(Arc::new(Vocabulary::from_corpus(b"hello, world\n")));
        let text = "world, hello\nhello";
        assert_eq!(tok.decode(&tok.encode(text)).expect("decode"), text);
    }

    #[test]
    fn multibyte_utf8_round_trips_through_byte_vocab() {
        let tok = ByteTokenizer::new(Arc::new(Vocabulary::byte_level()));
        let text = "café ☕";
        let ids = tok.encode(text);
        assert_eq!(ids.len(), text.len());
        assert_eq!(tok.decode(&ids).expect("decode"), text);
    }

    #[test]
    fn multi_byte_entries_are_unreachable_from_encode() {
        let tok = tokenizer(&["ab", "a", "b"]);
        assert_eq!(tok.encode("ab"), vec![1, 2]);
        assert_eq!(tok.decode(&[0]).expect("decode"), "ab");
    }

    #[test]
    fn first_matching_entry_wins() {
        let tok = tokenizer(&["zz", "z"]);
        assert_eq!(tok.encode("z"), vec![1]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let vocab = Vocabulary::new(vec![b"a".to_vec(), vec![0xff]]).expect("vocab");
        let tok = ByteTokenizer::new(Arc::new(vocab));
        assert_eq!(tok.decode(&[0, 1, 0]).expect("decode"), "a\u{fffd}a");
    }

    #[test]
    fn out_of_range_id_is_an_error() {
        let tok = tokenizer(&["a"]);
        let err = tok.decode(&[0, 3]).unwrap_err();
        assert!(err.to_string().contains("outside vocabulary"));
    }
}
