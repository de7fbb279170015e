use std::{collections::HashMap, sync::Arc};

use common_error::{SieveError, SieveResult};
use common_resource_request::ResourceRequest;
use serde::de::DeserializeOwned;
use sieve_core::Params;

use crate::{
    bind_params, CommonParams, Operator, OperatorDescriptor, OperatorInstance, OperatorKind,
};

/// What a constructor receives: the operator's own validated parameters (defaults
/// filled in) plus the reserved ones.
pub struct OperatorArgs<'a> {
    pub op_name: &'a str,
    pub params: &'a Params,
    pub common: &'a CommonParams,
}

impl OperatorArgs<'_> {
    /// Deserializes the parameters into the operator's config struct.
    pub fn bind<T: DeserializeOwned>(&self) -> SieveResult<T> {
        bind_params(self.op_name, self.params)
    }

    pub fn text_key(&self) -> &str {
        &self.common.text_key
    }
}

pub type OperatorConstructor =
    Arc<dyn Fn(&OperatorArgs<'_>) -> SieveResult<Operator> + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredOperator {
    pub descriptor: Arc<OperatorDescriptor>,
    constructor: OperatorConstructor,
}

impl RegisteredOperator {
    /// Validates one occurrence's parameters without constructing anything.
    pub fn bind(&self, params: &Params) -> SieveResult<BoundOperator> {
        let (common, own) = CommonParams::split(&self.descriptor, params)?;
        let params = self.descriptor.schema.validate(&self.descriptor.name, &own)?;
        Ok(BoundOperator {
            descriptor: self.descriptor.clone(),
            params,
            common,
            constructor: self.constructor.clone(),
        })
    }
}

impl std::fmt::Debug for RegisteredOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegisteredOperator({})", self.descriptor.name)
    }
}

/// An operator occurrence with validated parameters, constructed on demand.
#[derive(Clone)]
pub struct BoundOperator {
    descriptor: Arc<OperatorDescriptor>,
    params: Params,
    common: CommonParams,
    constructor: OperatorConstructor,
}

impl BoundOperator {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<OperatorDescriptor> {
        &self.descriptor
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn common(&self) -> &CommonParams {
        &self.common
    }

    pub fn resource_request(&self) -> ResourceRequest {
        self.common.resource_request()
    }

    pub fn instantiate(&self) -> SieveResult<OperatorInstance> {
        let args = OperatorArgs {
            op_name: &self.descriptor.name,
            params: &self.params,
            common: &self.common,
        };
        let op = (self.constructor)(&args)?;
        if op.kind() != self.descriptor.kind {
            return Err(SieveError::InternalError(format!(
                "`{}` is registered as a {} but its constructor built a {}",
                self.descriptor.name,
                self.descriptor.kind,
                op.kind()
            )));
        }
        Ok(OperatorInstance {
            descriptor: self.descriptor.clone(),
            common: self.common.clone(),
            op,
        })
    }
}

impl std::fmt::Debug for BoundOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundOperator")
            .field("name", &self.descriptor.name)
            .field("params", &self.params)
            .field("common", &self.common)
            .finish()
    }
}

/// Name → operator table. Populated once at startup, then shared read-only.
#[derive(Default)]
pub struct OperatorRegistry {
    operators: HashMap<String, RegisteredOperator>,
}

impl OperatorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, descriptor: OperatorDescriptor, constructor: F) -> SieveResult<()>
    where
        F: Fn(&OperatorArgs<'_>) -> SieveResult<Operator> + Send + Sync + 'static,
    {
        if self.operators.contains_key(&descriptor.name) {
            return Err(SieveError::DuplicateName {
                name: descriptor.name,
            });
        }
        log::debug!("Registering {} `{}`", descriptor.kind, descriptor.name);
        self.operators.insert(
            descriptor.name.clone(),
            RegisteredOperator {
                descriptor: Arc::new(descriptor),
                constructor: Arc::new(constructor),
            },
        );
        Ok(())
    }

    /// Registers every operator of a module.
    pub fn register_module<M: OperatorModule>(&mut self) -> SieveResult<()> {
        M::register(self)
    }

    pub fn resolve(&self, name: &str) -> SieveResult<&RegisteredOperator> {
        self.operators
            .get(name)
            .ok_or_else(|| SieveError::UnknownOperator {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// Descriptors of the given kind (or all), sorted by name.
    pub fn list(&self, kind: Option<OperatorKind>) -> Vec<&OperatorDescriptor> {
        let mut descriptors: Vec<&OperatorDescriptor> = self
            .operators
            .values()
            .map(|op| op.descriptor.as_ref())
            .filter(|descriptor| kind.map_or(true, |kind| descriptor.kind == kind))
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.list(None).iter().map(|d| d.name.as_str()).collect();
        f.debug_struct("OperatorRegistry")
            .field("operators", &names)
            .finish()
    }
}

/// A group of operators registered together, e.g. all built-in text operators.
pub trait OperatorModule {
    /// Register this module's operators into the given [OperatorRegistry].
    fn register(parent: &mut OperatorRegistry) -> SieveResult<()>;
}
