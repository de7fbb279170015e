mod plan;
mod planner;
mod recipe;
#[cfg(test)]
mod test;

pub use plan::{ExecutionPlan, FusedGroup, PlanOp, PlanStep};
pub use planner::FusionPlanner;
pub use recipe::{OpConfig, Recipe, RecipeFile, RecipeFormat};
