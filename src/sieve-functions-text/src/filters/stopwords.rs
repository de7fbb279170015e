use common_error::SieveResult;
use serde::Deserialize;
use sieve_core::Sample;
use sieve_ops::{
    Filter, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema,
    ParamSpec, ParamType,
};

use crate::{
    intermediates::{words, WORDS_TAG},
    providers::{word_list_key, WordList, DEFAULT_TOKEN_PATTERN},
};

pub const NAME: &str = "stopwords_filter";
pub const STAT: &str = "stopwords_ratio";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StopwordsConfig {
    lang: String,
    min_ratio: f64,
    tokenizer_pattern: String,
}

/// Keeps samples with at least `min_ratio` stopwords, a cheap signal of natural prose.
pub struct StopwordsFilter {
    text_key: String,
    config: StopwordsConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Filter)
        .with_tags(&[WORDS_TAG])
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("lang", ParamType::Str)
                .with_default("en")
                .one_of(["en"]),
            ParamSpec::new("min_ratio", ParamType::Float).with_default(0.3),
            ParamSpec::new("tokenizer_pattern", ParamType::Str).with_default(DEFAULT_TOKEN_PATTERN),
        ]))
        .with_docstring("Keeps samples whose stopword ratio is at least `min_ratio`.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    Ok(Operator::filter(StopwordsFilter {
        text_key: args.text_key().to_string(),
        config: args.bind()?,
    }))
}

impl Filter for StopwordsFilter {
    fn compute_stats(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()> {
        if sample.has_stat(STAT) {
            return Ok(());
        }
        let words = words(sample, &self.text_key, &self.config.tokenizer_pattern, ctx)?;
        let stopwords = ctx
            .load_model(&word_list_key(&self.config.lang))?
            .downcast::<WordList>()?;
        let ratio = if words.is_empty() {
            0.0
        } else {
            let hits = words
                .iter()
                .filter(|word| stopwords.contains(&word.to_lowercase()))
                .count();
            hits as f64 / words.len() as f64
        };
        sample.set_stat(STAT, ratio);
        Ok(())
    }

    fn keep(&self, sample: &Sample) -> bool {
        sample
            .stat_f64(STAT)
            .is_some_and(|ratio| ratio >= self.config.min_ratio)
    }
}
