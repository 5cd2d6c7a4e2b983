//! Tokenization capability for the lexical (BM25) index.

use unicode_segmentation::UnicodeSegmentation;

/// Turns text into the token sequence used for BM25 scoring.
///
/// The same tokenizer must be used at index-build time and at query time.
pub trait Tokenizer: Send + Sync {
    fn tokens(&self, text: &str) -> Vec<String>;
}

/// Common English function words, plus the archaic forms that dominate
/// KJV text without carrying meaning.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "had", "has", "have",
    "he", "her", "him", "his", "i", "in", "is", "it", "its", "me", "my", "not", "of", "on", "or",
    "our", "she", "so", "that", "the", "their", "them", "then", "there", "they", "this", "to",
    "unto", "up", "upon", "us", "was", "we", "were", "which", "who", "will", "with", "ye", "you",
    "thee", "thou", "thy", "hath", "shall", "saith",
];

/// Unicode word segmentation, lowercased, with optional stop-word removal.
#[derive(Debug, Clone, Copy)]
pub struct WordTokenizer {
    remove_stopwords: bool,
}

impl WordTokenizer {
    pub fn new(remove_stopwords: bool) -> Self {
        Self { remove_stopwords }
    }
}

impl Default for WordTokenizer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Tokenizer for WordTokenizer {
    fn tokens(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .map(|w| w.to_lowercase())
            .filter(|w| !self.remove_stopwords || !STOPWORDS.contains(&w.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_drops_punctuation() {
        let t = WordTokenizer::new(false);
        assert_eq!(
            t.tokens("Jesus wept."),
            vec!["jesus".to_string(), "wept".to_string()]
        );
    }

    #[test]
    fn test_removes_stopwords() {
        let t = WordTokenizer::default();
        assert_eq!(
            t.tokens("In the beginning God created the heaven and the earth."),
            vec!["beginning", "god", "created", "heaven", "earth"]
        );
    }

    #[test]
    fn test_empty_text() {
        assert!(WordTokenizer::default().tokens("  ,;  ").is_empty());
    }
}
