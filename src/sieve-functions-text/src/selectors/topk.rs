use common_error::SieveResult;
use serde::Deserialize;
use serde_json::Value;
use sieve_core::{Dataset, Sample, STATS_FIELD};
use sieve_ops::{
    Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema, ParamSpec, ParamType,
    Selector,
};

pub const NAME: &str = "topk_specified_field_selector";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TopkConfig {
    field_key: String,
    top_ratio: Option<f64>,
    topk: Option<usize>,
    reverse: bool,
}

/// Keeps the samples with the largest (or, with `reverse: false`, smallest) numeric
/// value under `field_key`.
///
/// `field_key` is a dotted path; `__stats__.num_words` reads a statistic. Samples
/// without a numeric value are dropped. The output is sorted by that value, ties in
/// dataset order. With both `topk` and `top_ratio` the smaller bound wins.
pub struct TopkSelector {
    config: TopkConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Selector)
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("field_key", ParamType::Str).required(),
            ParamSpec::new("top_ratio", ParamType::Float),
            ParamSpec::new("topk", ParamType::Int),
            ParamSpec::new("reverse", ParamType::Bool)
                .with_default(true)
                .with_doc("Select the largest values first"),
        ]))
        .with_docstring("Selects the top samples ranked by a numeric field.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    let config: TopkConfig = args.bind()?;
    if let Some(ratio) = config.top_ratio {
        common_error::ensure!(
            (0.0..=1.0).contains(&ratio),
            ValueError: "`{}` needs top_ratio in [0, 1], got {}", NAME, ratio
        );
    }
    Ok(Operator::selector(TopkSelector { config }))
}

fn lookup<'a>(sample: &'a Sample, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut value = if first == STATS_FIELD {
        sample.stat(parts.next()?)?
    } else {
        sample.get(first)?
    };
    for part in parts {
        value = value.get(part)?;
    }
    Some(value)
}

impl Selector for TopkSelector {
    fn select(&self, dataset: Dataset) -> SieveResult<Dataset> {
        let total = dataset.len();
        let mut keyed: Vec<(f64, Sample)> = dataset
            .into_iter()
            .filter_map(|sample| {
                let key = lookup(&sample, &self.config.field_key).and_then(Value::as_f64)?;
                Some((key, sample))
            })
            .collect();
        if self.config.reverse {
            keyed.sort_by(|(a, _), (b, _)| b.total_cmp(a));
        } else {
            keyed.sort_by(|(a, _), (b, _)| a.total_cmp(b));
        }

        let mut limit = keyed.len();
        if let Some(topk) = self.config.topk {
            limit = limit.min(topk);
        }
        if let Some(ratio) = self.config.top_ratio {
            limit = limit.min((ratio * total as f64).floor() as usize);
        }
        keyed.truncate(limit);
        Ok(keyed.into_iter().map(|(_, sample)| sample).collect())
    }
}
