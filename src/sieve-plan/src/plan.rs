use std::{collections::BTreeSet, sync::Arc};

use common_error::SieveResult;
use common_resource_request::ResourceRequest;
use itertools::Itertools;
use sieve_ops::{BoundOperator, OperatorDescriptor, OperatorInstance, OperatorKind};

/// One recipe operator inside a plan, with validated parameters.
#[derive(Clone, Debug)]
pub struct PlanOp {
    /// Position of the operator in the recipe.
    pub recipe_index: usize,
    bound: BoundOperator,
}

impl PlanOp {
    pub fn new(recipe_index: usize, bound: BoundOperator) -> Self {
        Self {
            recipe_index,
            bound,
        }
    }

    pub fn name(&self) -> &str {
        self.bound.name()
    }

    pub fn descriptor(&self) -> &Arc<OperatorDescriptor> {
        self.bound.descriptor()
    }

    pub fn kind(&self) -> OperatorKind {
        self.bound.descriptor().kind
    }

    pub fn bound(&self) -> &BoundOperator {
        &self.bound
    }

    pub fn resource_request(&self) -> ResourceRequest {
        self.bound.resource_request()
    }

    /// Constructs the operator. Called right before its step runs.
    pub fn instantiate(&self) -> SieveResult<OperatorInstance> {
        self.bound.instantiate()
    }

    fn display_params(&self) -> String {
        self.bound
            .params()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .join(", ")
    }
}

/// Adjacent filters that share an intermediate and run together on each sample.
#[derive(Clone, Debug)]
pub struct FusedGroup {
    pub ops: Vec<PlanOp>,
    /// Tags every member reads.
    pub shared_tags: BTreeSet<String>,
}

impl FusedGroup {
    pub fn name(&self) -> String {
        format!("fused[{}]", self.ops.iter().map(PlanOp::name).join(", "))
    }
}

#[derive(Clone, Debug)]
pub enum PlanStep {
    Single(PlanOp),
    Fused(FusedGroup),
}

impl PlanStep {
    pub fn name(&self) -> String {
        match self {
            Self::Single(op) => op.name().to_string(),
            Self::Fused(group) => group.name(),
        }
    }

    pub fn ops(&self) -> &[PlanOp] {
        match self {
            Self::Single(op) => std::slice::from_ref(op),
            Self::Fused(group) => &group.ops,
        }
    }

    pub fn is_fused(&self) -> bool {
        matches!(self, Self::Fused(_))
    }

    pub fn kind(&self) -> OperatorKind {
        match self {
            Self::Single(op) => op.kind(),
            Self::Fused(_) => OperatorKind::Filter,
        }
    }

    /// What one worker of this step needs. A fused step's worker runs every member.
    pub fn resource_request(&self) -> ResourceRequest {
        match self {
            Self::Single(op) => op.resource_request(),
            Self::Fused(group) => {
                let requests = group
                    .ops
                    .iter()
                    .map(PlanOp::resource_request)
                    .collect::<Vec<_>>();
                ResourceRequest::max_all(&requests.iter().collect::<Vec<_>>())
            }
        }
    }

    pub fn multiline_display(&self) -> Vec<String> {
        let mut res = vec![];
        match self {
            Self::Single(op) => {
                res.push(format!("{} [{}]", op.name(), op.kind()));
                if !op.bound.params().is_empty() {
                    res.push(format!("Params = {}", op.display_params()));
                }
            }
            Self::Fused(group) => {
                res.push(format!(
                    "Fused [{}] on {}",
                    group.ops.len(),
                    group.shared_tags.iter().join(", ")
                ));
                for op in &group.ops {
                    if op.bound.params().is_empty() {
                        res.push(format!("- {}", op.name()));
                    } else {
                        res.push(format!("- {}({})", op.name(), op.display_params()));
                    }
                }
            }
        }
        res.push(format!(
            "Resource request = {{ {} }}",
            self.resource_request().multiline_display().join(", ")
        ));
        res
    }
}

/// Ordered steps produced from a recipe. Flattening the steps gives back the
/// recipe's operators in their original order.
#[derive(Clone, Debug, Default)]
pub struct ExecutionPlan {
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn ops(&self) -> impl Iterator<Item = &PlanOp> {
        self.steps.iter().flat_map(PlanStep::ops)
    }

    pub fn op_names(&self) -> Vec<&str> {
        self.ops().map(PlanOp::name).collect()
    }

    pub fn num_fused(&self) -> usize {
        self.steps.iter().filter(|step| step.is_fused()).count()
    }

    pub fn multiline_display(&self) -> Vec<String> {
        let mut res = vec![format!(
            "ExecutionPlan: {} steps, {} operators",
            self.steps.len(),
            self.ops().count()
        )];
        for (i, step) in self.steps.iter().enumerate() {
            let mut lines = step.multiline_display().into_iter();
            if let Some(first) = lines.next() {
                res.push(format!("{i}: {first}"));
            }
            res.extend(lines.map(|line| format!("   {line}")));
        }
        res
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.multiline_display().join("\n"))
    }
}
