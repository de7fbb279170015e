use std::{collections::HashSet, sync::Arc};

use common_error::{SieveError, SieveResult};
use regex::Regex;
use sieve_core::ParamValue;
use sieve_model_cache::{ModelKey, ModelObject, ModelProvider};

pub const TOKENIZER_PROVIDER: &str = "builtin.tokenizer";
pub const WORD_LIST_PROVIDER: &str = "builtin.word_list";

pub const DEFAULT_TOKEN_PATTERN: &str = r"\w+";

const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same", "she",
    "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

/// Splits text into words with a regular expression.
#[derive(Debug)]
pub struct Tokenizer {
    pattern: Regex,
}

impl Tokenizer {
    pub fn new(pattern: &str) -> SieveResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| SieveError::ValueError(format!("Invalid token pattern: {e}")))?;
        Ok(Self { pattern })
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.pattern
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

pub fn tokenizer_key(pattern: &str) -> ModelKey {
    ModelKey::new(TOKENIZER_PROVIDER).with_param("pattern", pattern)
}

/// Provides a [`Tokenizer`] for the key's `pattern` parameter.
pub struct TokenizerProvider;

impl ModelProvider for TokenizerProvider {
    fn name(&self) -> &str {
        TOKENIZER_PROVIDER
    }

    fn load(&self, key: &ModelKey) -> SieveResult<ModelObject> {
        let pattern = key
            .param("pattern")
            .and_then(ParamValue::as_str)
            .unwrap_or(DEFAULT_TOKEN_PATTERN);
        log::debug!("Compiling tokenizer {}", key);
        Ok(Arc::new(Tokenizer::new(pattern)?))
    }
}

/// A set of lowercase words, such as a stopword list.
#[derive(Debug, Default)]
pub struct WordList {
    words: HashSet<String>,
}

impl WordList {
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for WordList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            words: iter.into_iter().map(|w| w.as_ref().to_lowercase()).collect(),
        }
    }
}

pub fn word_list_key(lang: &str) -> ModelKey {
    ModelKey::new(WORD_LIST_PROVIDER).with_param("lang", lang)
}

/// Provides the bundled word list for the key's `lang` parameter.
pub struct WordListProvider;

impl ModelProvider for WordListProvider {
    fn name(&self) -> &str {
        WORD_LIST_PROVIDER
    }

    fn load(&self, key: &ModelKey) -> SieveResult<ModelObject> {
        match key.param("lang").and_then(ParamValue::as_str) {
            Some("en") => Ok(Arc::new(ENGLISH_STOPWORDS.iter().collect::<WordList>())),
            other => Err(SieveError::ValueError(format!(
                "No bundled word list for language {other:?}"
            ))),
        }
    }
}
