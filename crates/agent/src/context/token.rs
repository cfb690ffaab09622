//! Token estimation.
//!
//! With the `tokenizer` feature and a `tokenizer.json` on disk, counts are
//! exact. Otherwise, or whenever encoding fails, the count is the number of
//! whitespace-separated words. Appending text never lowers that count.

use std::path::Path;
use tracing::warn;

/// Count of whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub enum TokenCounter {
    /// Whitespace word count.
    Heuristic,
    /// A loaded tokenizer, falling back to the heuristic on encode errors.
    #[cfg(feature = "tokenizer")]
    Exact(Box<tokenizers::Tokenizer>),
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic => f.write_str("TokenCounter::Heuristic"),
            #[cfg(feature = "tokenizer")]
            Self::Exact(_) => f.write_str("TokenCounter::Exact"),
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::Heuristic
    }
}

impl TokenCounter {
    pub fn heuristic() -> Self {
        Self::Heuristic
    }

    /// Load a tokenizer from `path`.
    #[cfg(feature = "tokenizer")]
    pub fn from_file(path: &Path) -> Result<Self, String> {
        tokenizers::Tokenizer::from_file(path)
            .map(|t| Self::Exact(Box::new(t)))
            .map_err(|e| e.to_string())
    }

    /// Use the configured tokenizer when one is available, the heuristic otherwise.
    pub fn from_config(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::Heuristic;
        };

        #[cfg(feature = "tokenizer")]
        {
            match Self::from_file(path) {
                Ok(counter) => counter,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load tokenizer, using word counts");
                    Self::Heuristic
                }
            }
        }

        #[cfg(not(feature = "tokenizer"))]
        {
            warn!(
                path = %path.display(),
                "tokenizer_path is set but exact counting is not compiled in, using word counts"
            );
            Self::Heuristic
        }
    }

    /// Estimate the token count of `text`.
    pub fn count(&self, text: &str) -> usize {
        match self {
            Self::Heuristic => word_count(text),
            #[cfg(feature = "tokenizer")]
            Self::Exact(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(_) => word_count(text),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(TokenCounter::heuristic().count(""), 0);
        assert_eq!(TokenCounter::heuristic().count("   \n\t"), 0);
    }

    #[test]
    fn counts_words() {
        assert_eq!(word_count("scan the target"), 3);
        assert_eq!(word_count("  leading and\ntrailing  "), 3);
    }

    #[test]
    fn appending_never_decreases() {
        let counter = TokenCounter::heuristic();
        let mut text = String::new();
        let mut last = 0;
        for piece in ["nmap", " -sV", " 10.0.0.1", "\n", "done", "!"] {
            text.push_str(piece);
            let now = counter.count(&text);
            assert!(now >= last, "{text:?} dropped from {last} to {now}");
            last = now;
        }
    }

    #[test]
    fn missing_tokenizer_path_falls_back() {
        let counter = TokenCounter::from_config(Some(Path::new("/nonexistent/tokenizer.json")));
        assert!(matches!(counter, TokenCounter::Heuristic));
        assert_eq!(counter.count("two words"), 2);
    }

    #[test]
    fn no_path_means_heuristic() {
        assert!(matches!(TokenCounter::from_config(None), TokenCounter::Heuristic));
    }
}
