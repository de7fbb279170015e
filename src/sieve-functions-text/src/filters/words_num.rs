use common_error::SieveResult;
use serde::Deserialize;
use sieve_core::Sample;
use sieve_ops::{
    Filter, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema,
    ParamSpec, ParamType,
};

use crate::{
    intermediates::{words, WORDS_TAG},
    providers::DEFAULT_TOKEN_PATTERN,
};

pub const NAME: &str = "words_num_filter";
pub const STAT: &str = "num_words";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WordsNumConfig {
    min_num: i64,
    max_num: Option<i64>,
    tokenizer_pattern: String,
}

/// Keeps samples whose word count is within `[min_num, max_num]`.
pub struct WordsNumFilter {
    text_key: String,
    config: WordsNumConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Filter)
        .with_tags(&[WORDS_TAG])
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("min_num", ParamType::Int).with_default(10i64),
            ParamSpec::new("max_num", ParamType::Int),
            ParamSpec::new("tokenizer_pattern", ParamType::Str)
                .with_default(DEFAULT_TOKEN_PATTERN)
                .with_doc("Regex a word has to match"),
        ]))
        .with_docstring("Keeps samples whose number of words is within a range.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    Ok(Operator::filter(WordsNumFilter {
        text_key: args.text_key().to_string(),
        config: args.bind()?,
    }))
}

impl Filter for WordsNumFilter {
    fn compute_stats(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()> {
        if sample.has_stat(STAT) {
            return Ok(());
        }
        let words = words(sample, &self.text_key, &self.config.tokenizer_pattern, ctx)?;
        sample.set_stat(STAT, words.len() as u64);
        Ok(())
    }

    fn keep(&self, sample: &Sample) -> bool {
        let Some(num) = sample.stat_f64(STAT) else {
            return false;
        };
        num >= self.config.min_num as f64
            && self.config.max_num.map_or(true, |max| num <= max as f64)
    }
}
