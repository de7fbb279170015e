use common_error::SieveResult;
use sieve_core::Sample;
use sieve_ops::{
    Filter, Mapper, OpContext, Operator, OperatorDescriptor, OperatorKind, OperatorRegistry,
    ParamSchema, ParamSpec, ParamType,
};

use crate::{OpConfig, Recipe};

struct PassFilter;

impl Filter for PassFilter {
    fn compute_stats(&self, _sample: &mut Sample, _ctx: &mut OpContext<'_>) -> SieveResult<()> {
        Ok(())
    }

    fn keep(&self, _sample: &Sample) -> bool {
        true
    }
}

struct IdentityMapper;

impl Mapper for IdentityMapper {
    fn process(&self, sample: Sample, _ctx: &mut OpContext<'_>) -> SieveResult<Vec<Sample>> {
        Ok(vec![sample])
    }
}

fn dummy_filter(name: &str, tags: &[&str]) -> OperatorDescriptor {
    OperatorDescriptor::new(name, OperatorKind::Filter)
        .with_tags(tags)
        .with_schema(ParamSchema::new(vec![
            ParamSpec::new("min_words", ParamType::Int).with_default(1i64),
        ]))
}

/// Registry of no-op operators covering every fusion-relevant combination of kind and tags.
pub fn dummy_registry() -> SieveResult<OperatorRegistry> {
    let mut registry = OperatorRegistry::new();
    for (name, tags) in [
        ("words_filter_a", &["words"][..]),
        ("words_filter_b", &["words"][..]),
        ("lines_filter", &["lines"][..]),
        ("words_lines_filter", &["words", "lines"][..]),
        ("untagged_filter", &[][..]),
    ] {
        registry.register(dummy_filter(name, tags), |_| Ok(Operator::filter(PassFilter)))?;
    }
    registry.register(
        OperatorDescriptor::new("words_mapper", OperatorKind::Mapper).with_tags(&["words"]),
        |_| Ok(Operator::mapper(IdentityMapper)),
    )?;
    registry.register(
        OperatorDescriptor::new("doubling_mapper", OperatorKind::Mapper),
        |_| Ok(Operator::mapper(IdentityMapper)),
    )?;
    Ok(registry)
}

pub fn recipe_of(names: &[&str]) -> Recipe {
    Recipe::new(names.iter().map(|name| OpConfig::new(*name)).collect())
}

