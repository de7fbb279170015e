use std::collections::HashSet;

use common_error::{SieveError, SieveResult};
use serde::Deserialize;
use serde_json::Value;
use sieve_core::{Dataset, Sample};
use sieve_ops::{
    Deduplicator, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind,
    ParamSchema, ParamSpec, ParamType,
};
use xxhash_rust::xxh3::xxh3_64;

pub const NAME: &str = "document_deduplicator";
pub const HASH_STAT: &str = "doc_hash";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DocumentDedupConfig {
    lowercase: bool,
    ignore_non_character: bool,
}

/// Exact document deduplication on an xxh3 hash of the (optionally normalized) text.
///
/// The hash lives in the stats namespace only between `compute_hash` and `dedup`;
/// kept samples leave the step without it.
pub struct DocumentDeduplicator {
    text_key: String,
    config: DocumentDedupConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Deduplicator)
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("lowercase", ParamType::Bool).with_default(false),
            ParamSpec::new("ignore_non_character", ParamType::Bool)
                .with_default(false)
                .with_doc("Drop whitespace, digits and punctuation before hashing"),
        ]))
        .with_docstring("Removes samples whose text exactly matches an earlier sample.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    Ok(Operator::deduplicator(DocumentDeduplicator {
        text_key: args.text_key().to_string(),
        config: args.bind()?,
    }))
}

impl DocumentDeduplicator {
    fn hash(&self, text: &str) -> u64 {
        let mut normalized = if self.config.ignore_non_character {
            text.chars().filter(|c| c.is_alphabetic()).collect()
        } else {
            text.to_string()
        };
        if self.config.lowercase {
            normalized = normalized.to_lowercase();
        }
        xxh3_64(normalized.as_bytes())
    }
}

impl Deduplicator for DocumentDeduplicator {
    fn compute_hash(&self, sample: &mut Sample, _ctx: &mut OpContext<'_>) -> SieveResult<()> {
        let hash = self.hash(sample.get_str(&self.text_key)?);
        sample.set_stat(HASH_STAT, hash);
        Ok(())
    }

    fn dedup(&self, dataset: Dataset) -> SieveResult<Dataset> {
        let mut seen = HashSet::with_capacity(dataset.len());
        let mut kept = Dataset::empty();
        let total = dataset.len();
        for mut sample in dataset {
            let hash = sample
                .remove_stat(HASH_STAT)
                .as_ref()
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    SieveError::InternalError(format!("`{NAME}` found a sample without a hash"))
                })?;
            if seen.insert(hash) {
                kept.push(sample);
            }
        }
        log::debug!("Removed {} duplicate documents", total - kept.len());
        Ok(kept)
    }
}
