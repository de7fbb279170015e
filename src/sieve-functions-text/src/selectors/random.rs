use common_error::SieveResult;
use rand::{rngs::StdRng, seq::index, SeedableRng};
use serde::Deserialize;
use sieve_core::Dataset;
use sieve_ops::{
    Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema, ParamSpec, ParamType,
    Selector,
};

pub const NAME: &str = "random_selector";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RandomConfig {
    select_ratio: Option<f64>,
    select_num: Option<usize>,
    seed: u64,
}

/// Keeps a seeded random subset, in dataset order. With both `select_num` and
/// `select_ratio` the smaller bound wins; with neither every sample is kept.
pub struct RandomSelector {
    config: RandomConfig,
}

pub fn descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(NAME, OperatorKind::Selector)
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("select_ratio", ParamType::Float),
            ParamSpec::new("select_num", ParamType::Int),
            ParamSpec::new("seed", ParamType::Int).with_default(42i64),
        ]))
        .with_docstring("Selects a reproducible random subset of samples.")
}

pub fn construct(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    let config: RandomConfig = args.bind()?;
    if let Some(ratio) = config.select_ratio {
        common_error::ensure!(
            (0.0..=1.0).contains(&ratio),
            ValueError: "`{}` needs select_ratio in [0, 1], got {}", NAME, ratio
        );
    }
    Ok(Operator::selector(RandomSelector { config }))
}

impl Selector for RandomSelector {
    fn select(&self, dataset: Dataset) -> SieveResult<Dataset> {
        let total = dataset.len();
        let mut amount = total;
        if let Some(num) = self.config.select_num {
            amount = amount.min(num);
        }
        if let Some(ratio) = self.config.select_ratio {
            amount = amount.min((ratio * total as f64).floor() as usize);
        }
        if amount == total {
            return Ok(dataset);
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut picked = index::sample(&mut rng, total, amount).into_vec();
        picked.sort_unstable();

        let mut samples = dataset.into_samples().into_iter().enumerate();
        let mut selected = Dataset::empty();
        for i in picked {
            if let Some((_, sample)) = samples.find(|(j, _)| *j == i) {
                selected.push(sample);
            }
        }
        Ok(selected)
    }
}
