use common_error::SieveResult;
use serde::Deserialize;
use sieve_core::Sample;
use sieve_ops::{
    Filter, OpContext, Operator, OperatorArgs, OperatorDescriptor, OperatorKind, ParamSchema,
    ParamSpec, ParamType,
};

use crate::intermediates::{lines, LINES_TAG};

pub const MAXIMUM_NAME: &str = "maximum_line_length_filter";
pub const MAXIMUM_STAT: &str = "max_line_length";
pub const AVERAGE_NAME: &str = "average_line_length_filter";
pub const AVERAGE_STAT: &str = "avg_line_length";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineMeasure {
    Maximum,
    Average,
}

impl LineMeasure {
    fn stat(self) -> &'static str {
        match self {
            Self::Maximum => MAXIMUM_STAT,
            Self::Average => AVERAGE_STAT,
        }
    }

    fn measure(self, lines: &[String]) -> f64 {
        let lengths = lines.iter().map(|line| line.chars().count());
        match self {
            Self::Maximum => lengths.max().unwrap_or(0) as f64,
            Self::Average if lines.is_empty() => 0.0,
            Self::Average => lengths.sum::<usize>() as f64 / lines.len() as f64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LineLengthConfig {
    min_len: f64,
    max_len: Option<f64>,
}

/// Keeps samples whose maximum or average line length is within `[min_len, max_len]`.
pub struct LineLengthFilter {
    text_key: String,
    measure: LineMeasure,
    config: LineLengthConfig,
}

fn schema() -> ParamSchema {
    ParamSchema::new(vec![
        ParamSpec::new("min_len", ParamType::Float).with_default(10.0),
        ParamSpec::new("max_len", ParamType::Float),
    ])
}

pub fn maximum_descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(MAXIMUM_NAME, OperatorKind::Filter)
        .with_tags(&[LINES_TAG])
        .with_schema(schema())
        .with_docstring("Keeps samples whose longest line is within a length range.")
}

pub fn average_descriptor() -> OperatorDescriptor {
    OperatorDescriptor::new(AVERAGE_NAME, OperatorKind::Filter)
        .with_tags(&[LINES_TAG])
        .with_schema(schema())
        .with_docstring("Keeps samples whose average line length is within a range.")
}

pub fn construct_maximum(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    construct(args, LineMeasure::Maximum)
}

pub fn construct_average(args: &OperatorArgs<'_>) -> SieveResult<Operator> {
    construct(args, LineMeasure::Average)
}

fn construct(args: &OperatorArgs<'_>, measure: LineMeasure) -> SieveResult<Operator> {
    Ok(Operator::filter(LineLengthFilter {
        text_key: args.text_key().to_string(),
        measure,
        config: args.bind()?,
    }))
}

impl Filter for LineLengthFilter {
    fn compute_stats(&self, sample: &mut Sample, ctx: &mut OpContext<'_>) -> SieveResult<()> {
        let stat = self.measure.stat();
        if sample.has_stat(stat) {
            return Ok(());
        }
        let lines = lines(sample, &self.text_key, ctx)?;
        sample.set_stat(stat, self.measure.measure(&lines));
        Ok(())
    }

    fn keep(&self, sample: &Sample) -> bool {
        sample.stat_f64(self.measure.stat()).is_some_and(|len| {
            len >= self.config.min_len && self.config.max_len.map_or(true, |max| len <= max)
        })
    }
}
