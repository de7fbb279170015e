use common_error::SieveResult;
use serde::Deserialize;
use sieve_core::Sample;
use sieve_ops::{
    Filter, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema,
    ParamSpec, ParamType,
};

pub const NAME: &str = "text_length_filter";
pub const STAT: &str = "text_len";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TextLengthConfig {
    min_len: i64,
    max_len: Option<i64>,
}

/// Keeps samples whose text length in characters is within `[min_len, max_len]`.
pub struct TextLengthFilter {
    text_key: String,
    config: TextLengthConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Filter)
        .batched()
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("min_len", ParamType::Int).with_default(10i64),
            ParamSpec::new("max_len", ParamType::Int),
        ]))
        .with_docstring("Keeps samples whose text length is within a range.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    Ok(Operator::filter(TextLengthFilter {
        text_key: args.text_key().to_string(),
        config: args.bind()?,
    }))
}

impl Filter for TextLengthFilter {
    fn compute_stats(&self, sample: &mut Sample, _ctx: &mut OpContext<'_>) -> SieveResult<()> {
        if sample.has_stat(STAT) {
            return Ok(());
        }
        let len = sample.get_str(&self.text_key)?.chars().count();
        sample.set_stat(STAT, len as u64);
        Ok(())
    }

    /// Measures the whole batch before writing any stat, so a sample missing its text
    /// leaves the batch untouched.
    fn compute_stats_batched(
        &self,
        samples: &mut [Sample],
        _ctx: &mut OpContext<'_>,
    ) -> SieveResult<()> {
        let lens = samples
            .iter()
            .map(|sample| {
                if sample.has_stat(STAT) {
                    Ok(None)
                } else {
                    Ok(Some(sample.get_str(&self.text_key)?.chars().count()))
                }
            })
            .collect::<SieveResult<Vec<_>>>()?;
        for (sample, len) in samples.iter_mut().zip(lens) {
            if let Some(len) = len {
                sample.set_stat(STAT, len as u64);
            }
        }
        Ok(())
    }

    fn keep(&self, sample: &Sample) -> bool {
        let Some(len) = sample.stat_f64(STAT) else {
            return false;
        };
        len >= self.config.min_len as f64
            && self.config.max_len.map_or(true, |max| len <= max as f64)
    }
}
