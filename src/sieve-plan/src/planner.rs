use std::collections::BTreeSet;

use common_error::SieveResult;
use itertools::Itertools;
use sieve_ops::OperatorRegistry;

use crate::{ExecutionPlan, FusedGroup, PlanOp, PlanStep, Recipe};

/// Turns a recipe into an [`ExecutionPlan`], fusing runs of adjacent filters that
/// read a common intermediate so it is computed once per sample.
///
/// A run only ever contains filters with at least one intermediate tag. An operator
/// joins the current run when it shares any tag with the run's common tags, which
/// then narrow to the intersection; otherwise the run is closed and a new one starts.
#[derive(Debug)]
pub struct FusionPlanner<'a> {
    registry: &'a OperatorRegistry,
    op_fusion: bool,
}

impl<'a> FusionPlanner<'a> {
    pub fn new(registry: &'a OperatorRegistry) -> Self {
        Self {
            registry,
            op_fusion: true,
        }
    }

    #[must_use]
    pub fn with_op_fusion(mut self, op_fusion: bool) -> Self {
        self.op_fusion = op_fusion;
        self
    }

    pub fn plan(&self, recipe: &Recipe) -> SieveResult<ExecutionPlan> {
        let mut steps = Vec::with_capacity(recipe.len());
        let mut run = FusableRun::default();

        for (recipe_index, config) in recipe.iter().enumerate() {
            let registered = self.registry.resolve(&config.name)?;
            let op = PlanOp::new(recipe_index, registered.bind(&config.params)?);

            if !self.op_fusion || !op.descriptor().is_fusable() {
                run.close_into(&mut steps);
                steps.push(PlanStep::Single(op));
                continue;
            }

            let tags = op.descriptor().intermediate_tags.clone();
            let shared: BTreeSet<String> = run.common_tags.intersection(&tags).cloned().collect();
            if run.ops.is_empty() || shared.is_empty() {
                run.close_into(&mut steps);
                run.common_tags = tags;
            } else {
                run.common_tags = shared;
            }
            run.ops.push(op);
        }
        run.close_into(&mut steps);

        let plan = ExecutionPlan::new(steps);
        log::debug!(
            "Planned {} operators into {} steps ({} fused)",
            recipe.len(),
            plan.len(),
            plan.num_fused()
        );
        Ok(plan)
    }
}

#[derive(Default)]
struct FusableRun {
    ops: Vec<PlanOp>,
    common_tags: BTreeSet<String>,
}

impl FusableRun {
    fn close_into(&mut self, steps: &mut Vec<PlanStep>) {
        let ops = std::mem::take(&mut self.ops);
        let shared_tags = std::mem::take(&mut self.common_tags);
        match ops.len() {
            0 => {}
            1 => steps.extend(ops.into_iter().map(PlanStep::Single)),
            _ => {
                log::info!(
                    "Fusing {} on shared intermediates [{}]",
                    ops.iter().map(PlanOp::name).join(", "),
                    shared_tags.iter().join(", ")
                );
                steps.push(PlanStep::Fused(FusedGroup { ops, shared_tags }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common_error::{SieveError, SieveResult};
    use rstest::rstest;

    use super::FusionPlanner;
    use crate::{
        test::{dummy_registry, recipe_of},
        ExecutionPlan, OpConfig, PlanStep, Recipe,
    };

    fn plan(names: &[&str], op_fusion: bool) -> SieveResult<ExecutionPlan> {
        let registry = dummy_registry()?;
        FusionPlanner::new(&registry)
            .with_op_fusion(op_fusion)
            .plan(&recipe_of(names))
    }

    /// Renders each step as its member names, e.g. `[["a", "b"], ["c"]]`.
    fn shape(plan: &ExecutionPlan) -> Vec<Vec<String>> {
        plan.steps()
            .iter()
            .map(|step| step.ops().iter().map(|op| op.name().to_string()).collect())
            .collect()
    }

    fn expect_shape(plan: &ExecutionPlan, expected: &[&[&str]]) {
        let expected: Vec<Vec<String>> = expected
            .iter()
            .map(|step| step.iter().map(|s| (*s).to_string()).collect())
            .collect();
        assert_eq!(shape(plan), expected);
    }

    /// [filter(words), filter(words), mapper] -> [Fused([A, B]), Single(C)]
    #[test]
    fn adjacent_filters_on_shared_tag_fuse() -> SieveResult<()> {
        let plan = plan(&["words_filter_a", "words_filter_b", "doubling_mapper"], true)?;
        expect_shape(&plan, &[&["words_filter_a", "words_filter_b"], &["doubling_mapper"]]);
        assert!(plan.steps()[0].is_fused());
        assert!(!plan.steps()[1].is_fused());
        Ok(())
    }

    #[test]
    fn fusion_disabled_keeps_every_op_single() -> SieveResult<()> {
        let plan = plan(&["words_filter_a", "words_filter_b", "doubling_mapper"], false)?;
        expect_shape(
            &plan,
            &[&["words_filter_a"], &["words_filter_b"], &["doubling_mapper"]],
        );
        assert_eq!(plan.num_fused(), 0);
        Ok(())
    }

    #[test]
    fn empty_recipe_gives_empty_plan() -> SieveResult<()> {
        let registry = dummy_registry()?;
        let plan = FusionPlanner::new(&registry).plan(&Recipe::default())?;
        assert!(plan.is_empty());
        Ok(())
    }

    #[test]
    fn single_op_never_fuses() -> SieveResult<()> {
        let plan = plan(&["words_filter_a"], true)?;
        expect_shape(&plan, &[&["words_filter_a"]]);
        assert!(!plan.steps()[0].is_fused());
        Ok(())
    }

    /// Partial overlap: {words, lines} then {lines} then {words} only keeps the first two
    /// together, because the common set narrows to {lines} after the second op.
    #[test]
    fn partial_overlap_narrows_common_tags() -> SieveResult<()> {
        let plan = plan(
            &["words_lines_filter", "lines_filter", "words_filter_a"],
            true,
        )?;
        expect_shape(
            &plan,
            &[&["words_lines_filter", "lines_filter"], &["words_filter_a"]],
        );
        match &plan.steps()[0] {
            PlanStep::Fused(group) => {
                assert_eq!(group.shared_tags.iter().collect::<Vec<_>>(), vec!["lines"]);
            }
            PlanStep::Single(_) => panic!("expected a fused step"),
        }
        Ok(())
    }

    #[rstest]
    #[case::mapper_breaks_run(
        &["words_filter_a", "words_mapper", "words_filter_b"],
        &[&["words_filter_a"] as &[&str], &["words_mapper"], &["words_filter_b"]],
    )]
    #[case::untagged_filter_breaks_run(
        &["words_filter_a", "untagged_filter", "words_filter_b"],
        &[&["words_filter_a"] as &[&str], &["untagged_filter"], &["words_filter_b"]],
    )]
    #[case::disjoint_tags_start_new_run(
        &["words_filter_a", "words_filter_b", "lines_filter", "words_lines_filter"],
        &[&["words_filter_a", "words_filter_b"] as &[&str], &["lines_filter", "words_lines_filter"]],
    )]
    #[case::three_way_fusion(
        &["words_filter_a", "words_lines_filter", "words_filter_b"],
        &[&["words_filter_a", "words_lines_filter", "words_filter_b"] as &[&str]],
    )]
    fn fusion_boundaries(#[case] names: &[&str], #[case] expected: &[&[&str]]) -> SieveResult<()> {
        let plan = plan(names, true)?;
        expect_shape(&plan, expected);
        assert_eq!(plan.op_names(), names.to_vec());
        Ok(())
    }

    #[test]
    fn unknown_operator_fails_planning() {
        let err = plan(&["words_filter_a", "no_such_op"], true).unwrap_err();
        assert!(matches!(err, SieveError::UnknownOperator { name } if name == "no_such_op"));
    }

    #[test]
    fn invalid_parameter_fails_planning() -> SieveResult<()> {
        let registry = dummy_registry()?;
        let recipe = Recipe::default()
            .with_op(OpConfig::new("words_filter_a").with_param("min_words", "many"));
        let err = FusionPlanner::new(&registry).plan(&recipe).unwrap_err();
        assert!(matches!(
            err,
            SieveError::InvalidParameter { ref op_name, ref param, .. }
                if op_name == "words_filter_a" && param == "min_words"
        ));
        Ok(())
    }

    #[test]
    fn fused_step_merges_resource_requests() -> SieveResult<()> {
        let registry = dummy_registry()?;
        let recipe = Recipe::default()
            .with_op(OpConfig::new("words_filter_a").with_param("cpu_required", 2.0))
            .with_op(OpConfig::new("words_filter_b").with_param("num_proc", 3i64));
        let plan = FusionPlanner::new(&registry).plan(&recipe)?;
        let request = plan.steps()[0].resource_request();
        assert!((request.cpu_cores - 2.0).abs() < f64::EPSILON);
        assert_eq!(request.declared_num_proc, Some(3));
        Ok(())
    }

    #[test]
    fn explain_lists_steps_and_members() -> SieveResult<()> {
        let plan = plan(&["words_filter_a", "words_filter_b", "doubling_mapper"], true)?;
        let text = plan.to_string();
        assert!(text.starts_with("ExecutionPlan: 2 steps, 3 operators"));
        assert!(text.contains("0: Fused [2] on words"));
        assert!(text.contains("- words_filter_a(min_words=1)"));
        assert!(text.contains("1: doubling_mapper [mapper]"));
        Ok(())
    }
}
