//! Per-sample intermediate values shared through the sample's context.
//!
//! Operators that declare the `words` or `lines` tag read these helpers instead of
//! recomputing, so the members of a fused step split a sample's text once.

use std::sync::Arc;

use common_error::SieveResult;
use sieve_core::Sample;
use sieve_ops::{ContextKey, OpContext};

use crate::providers::{tokenizer_key, Tokenizer};

pub const WORDS_TAG: &str = "words";
pub const LINES_TAG: &str = "lines";

/// Words of `text_key`, tokenized with `pattern`.
pub fn words(
    sample: &Sample,
    text_key: &str,
    pattern: &str,
    ctx: &mut OpContext<'_>,
) -> SieveResult<Arc<Vec<String>>> {
    let model_key = tokenizer_key(pattern);
    let key = ContextKey::derived(WORDS_TAG, format_args!("{model_key}@{text_key}"));
    if let Some(words) = ctx.context().get::<Vec<String>>(&key) {
        return Ok(words);
    }
    let text = sample.get_str(text_key)?;
    let tokenizer = ctx.load_model(&model_key)?.downcast::<Tokenizer>()?;
    ctx.get_or_compute(&key, || Ok(tokenizer.tokenize(text)))
}

/// Lines of `text_key`, split on `\n`.
pub fn lines(
    sample: &Sample,
    text_key: &str,
    ctx: &mut OpContext<'_>,
) -> SieveResult<Arc<Vec<String>>> {
    let key = ContextKey::derived(LINES_TAG, text_key);
    ctx.get_or_compute(&key, || {
        Ok(sample
            .get_str(text_key)?
            .lines()
            .map(str::to_string)
            .collect())
    })
}
