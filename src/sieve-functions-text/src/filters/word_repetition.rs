use std::collections::HashMap;

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

pub const NAME: &str = "word_repetition_filter";
pub const STAT: &str = "word_rep_ratio";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WordRepetitionConfig {
    rep_len: usize,
    min_ratio: f64,
    max_ratio: f64,
    tokenizer_pattern: String,
}

/// Keeps samples whose share of repeated word n-grams is within `[min_ratio, max_ratio]`.
pub struct WordRepetitionFilter {
    text_key: String,
    config: WordRepetitionConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Filter)
        .with_tags(&[WORDS_TAG])
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("rep_len", ParamType::Int)
                .with_default(10i64)
                .with_doc("Length of the word n-grams"),
            ParamSpec::new("min_ratio", ParamType::Float).with_default(0.0),
            ParamSpec::new("max_ratio", ParamType::Float).with_default(0.5),
            ParamSpec::new("tokenizer_pattern", ParamType::Str).with_default(DEFAULT_TOKEN_PATTERN),
        ]))
        .with_docstring("Keeps samples whose word n-gram repetition ratio is within a range.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    let config: WordRepetitionConfig = args.bind()?;
    common_error::ensure!(
        config.rep_len > 0,
        ValueError: "`{}` needs rep_len > 0, got {}", NAME, config.rep_len
    );
    Ok(Operator::filter(WordRepetitionFilter {
        text_key: args.text_key().to_string(),
        config,
    }))
}

/// Share of n-gram occurrences whose n-gram occurs more than once.
fn repetition_ratio(words: &[String], n: usize) -> f64 {
    if words.len() < n {
        return 0.0;
    }
    let lowered: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    let mut counts: HashMap<&[String], usize> = HashMap::new();
    for ngram in lowered.windows(n) {
        *counts.entry(ngram).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    let repeated: usize = counts.values().filter(|count| **count > 1).sum();
    repeated as f64 / total as f64
}

impl Filter for WordRepetitionFilter {
    fn compute_stats(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()> {
        if sample.has_stat(STAT) {
            return Ok(());
        }
        let words = words(sample, &self.text_key, &self.config.tokenizer_pattern, ctx)?;
        sample.set_stat(STAT, repetition_ratio(&words, self.config.rep_len));
        Ok(())
    }

    fn keep(&self, sample: &Sample) -> bool {
        sample
            .stat_f64(STAT)
            .is_some_and(|ratio| ratio >= self.config.min_ratio && ratio <= self.config.max_ratio)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::repetition_ratio;

    fn words(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[rstest]
    #[case("a b c d", 2, 0.0)]
    #[case("a b a b", 2, 2.0 / 3.0)]
    #[case("x X x x", 1, 1.0)]
    #[case("too short", 3, 0.0)]
    fn ratio_of_repeated_ngrams(#[case] text: &str, #[case] n: usize, #[case] expected: f64) {
        let ratio = repetition_ratio(&words(text), n);
        assert!((ratio - expected).abs() < 1e-9, "{ratio} != {expected}");
    }
}
