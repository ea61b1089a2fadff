//! Character-level cleanup of generated text.

/// Keeps ASCII letters and the digits `1`-`9`, in order. Everything else,
/// including `0`, whitespace, newlines and punctuation, is dropped.
pub fn filter_output(text: &str) -> String {
    text.chars().filter(|&c| is_retained(c)).collect()
}

fn is_retained(c: char) -> bool {
    c.is_ascii_alphabetic() || ('1'..='9').contains(&c)
}
