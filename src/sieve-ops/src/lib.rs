mod common;
mod context;
mod descriptor;
mod operator;
mod registry;
mod schema;

pub use common::{CommonParams, DEFAULT_TEXT_KEY, RESERVED_PARAMS};
pub use context::{Context, ContextKey, OpContext, WorkerContext};
pub use descriptor::{Accelerator, OperatorDescriptor, OperatorKind};
pub use operator::{Deduplicator, Filter, Mapper, Operator, OperatorInstance, Selector};
pub use registry::{
    BoundOperator, OperatorArgs, OperatorConstructor, OperatorModule, OperatorRegistry,
    RegisteredOperator,
};
pub use schema::{bind_params, ParamSchema, ParamSpec, ParamType};
