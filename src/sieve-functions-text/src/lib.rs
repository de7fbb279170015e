mod document_dedup;
pub mod filters;
pub mod intermediates;
pub mod mappers;
pub mod providers;
pub mod selectors;

use common_error::SieveResult;
use sieve_model_cache::ModelProviders;
use sieve_ops::{OperatorModule, OperatorRegistry};

pub use document_dedup::{DocumentDeduplicator, HASH_STAT};
pub use providers::{Tokenizer, TokenizerProvider, WordList, WordListProvider};

/// The built-in text operators.
pub struct TextOperators;

impl OperatorModule for TextOperators {
    fn register(parent: &mut OperatorRegistry) -> SieveResult<()> {
        use filters::{line_length, stopwords, text_length, word_repetition, words_num};
        use mappers::{text_chunk, whitespace_normalization};
        use selectors::{random, topk};

        parent.register(words_num::descriptor(), words_num::construct)?;
        parent.register(word_repetition::descriptor(), word_repetition::construct)?;
        parent.register(stopwords::descriptor(), stopwords::construct)?;
        parent.register(text_length::descriptor(), text_length::construct)?;
        parent.register(
            line_length::maximum_descriptor(),
            line_length::construct_maximum,
        )?;
        parent.register(
            line_length::average_descriptor(),
            line_length::construct_average,
        )?;
        parent.register(text_chunk::descriptor(), text_chunk::construct)?;
        parent.register(
            whitespace_normalization::descriptor(),
            whitespace_normalization::construct,
        )?;
        parent.register(document_dedup::descriptor(), document_dedup::construct)?;
        parent.register(topk::descriptor(), topk::construct)?;
        parent.register(random::descriptor(), random::construct)?;
        Ok(())
    }
}

pub fn register_builtins(registry: &mut OperatorRegistry) -> SieveResult<()> {
    registry.register_module::<TextOperators>()
}

/// Registers the providers the built-in operators load models from.
pub fn register_providers(providers: &mut ModelProviders) -> SieveResult<()> {
    providers.register(TokenizerProvider)?;
    providers.register(WordListProvider)?;
    Ok(())
}

/// A registry holding only the built-in operators.
pub fn builtin_registry() -> SieveResult<OperatorRegistry> {
    let mut registry = OperatorRegistry::new();
    register_builtins(&mut registry)?;
    Ok(registry)
}

pub fn builtin_providers() -> SieveResult<ModelProviders> {
    let mut providers = ModelProviders::new();
    register_providers(&mut providers)?;
    Ok(providers)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common_error::SieveError;
    use sieve_core::{ParamValue, Params, Sample};
    use sieve_model_cache::{ModelCache, WorkerModels};
    use sieve_ops::{Filter, OpContext, Operator, OperatorKind, WorkerContext};

    use super::*;

    fn worker() -> SieveResult<WorkerContext> {
        let cache = ModelCache::new(Arc::new(builtin_providers()?));
        Ok(WorkerContext::new(
            0,
            None,
            Arc::new(WorkerModels::new(Arc::new(cache))),
        ))
    }

    fn filter(
        registry: &OperatorRegistry,
        name: &str,
        params: Params,
    ) -> SieveResult<Arc<dyn Filter>> {
        match registry.resolve(name)?.bind(&params)?.instantiate()?.op {
            Operator::Filter(filter) => Ok(filter),
            other => Err(SieveError::InternalError(format!("{name} is a {}", other.kind()))),
        }
    }

    #[test]
    fn registers_every_builtin_once() -> SieveResult<()> {
        let mut registry = builtin_registry()?;
        assert_eq!(registry.len(), 11);
        assert_eq!(registry.list(Some(OperatorKind::Filter)).len(), 6);
        assert_eq!(registry.list(Some(OperatorKind::Selector)).len(), 2);
        assert!(matches!(
            register_builtins(&mut registry),
            Err(SieveError::DuplicateName { .. })
        ));
        Ok(())
    }

    #[test]
    fn words_filters_share_one_tokenization() -> SieveResult<()> {
        let registry = builtin_registry()?;
        let words_num = filter(
            &registry,
            "words_num_filter",
            Params::from([("min_num".to_string(), ParamValue::Int(3))]),
        )?;
        let stopwords = filter(&registry, "stopwords_filter", Params::new())?;

        let worker = worker()?;
        let mut ctx = OpContext::new(&worker);
        let mut sample = Sample::new().with_field("text", "the cat sat on the mat");
        words_num.compute_stats(&mut sample, &mut ctx)?;
        stopwords.compute_stats(&mut sample, &mut ctx)?;

        assert_eq!(ctx.context().computed(), 1);
        assert_eq!(sample.stat_f64("num_words"), Some(6.0));
        assert_eq!(sample.stat_f64("stopwords_ratio"), Some(0.5));
        assert!(words_num.keep(&sample));
        assert!(stopwords.keep(&sample));
        Ok(())
    }

    #[test]
    fn existing_stats_are_not_recomputed() -> SieveResult<()> {
        let registry = builtin_registry()?;
        let words_num = filter(&registry, "words_num_filter", Params::new())?;
        let worker = worker()?;
        let mut ctx = OpContext::new(&worker);
        let mut sample = Sample::new().with_field("text", "one two");
        sample.set_stat("num_words", 12u64);
        words_num.compute_stats(&mut sample, &mut ctx)?;
        assert!(ctx.context().is_empty());
        assert!(words_num.keep(&sample));
        Ok(())
    }

    #[test]
    fn text_key_is_honored() -> SieveResult<()> {
        let registry = builtin_registry()?;
        let length = filter(
            &registry,
            "text_length_filter",
            Params::from([
                ("text_key".to_string(), ParamValue::from("body")),
                ("min_len".to_string(), ParamValue::Int(3)),
            ]),
        )?;
        let worker = worker()?;
        let mut ctx = OpContext::new(&worker);

        let mut sample = Sample::new().with_field("body", "abcd");
        length.compute_stats(&mut sample, &mut ctx)?;
        assert_eq!(sample.stat_f64("text_len"), Some(4.0));

        let mut missing = Sample::new().with_field("text", "abcd");
        assert!(matches!(
            length.compute_stats(&mut missing, &mut ctx),
            Err(SieveError::FieldNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn invalid_construction_params_fail_to_instantiate() -> SieveResult<()> {
        let registry = builtin_registry()?;
        let bound = registry.resolve("text_chunk_mapper")?.bind(&Params::from([
            ("max_len".to_string(), ParamValue::Int(4)),
            ("overlap_len".to_string(), ParamValue::Int(4)),
        ]))?;
        assert!(matches!(bound.instantiate(), Err(SieveError::ValueError(_))));
        Ok(())
    }
}
