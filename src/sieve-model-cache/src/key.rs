use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter, Result},
};

use sieve_core::ParamValue;

/// Identifies a loadable model or asset by provider and construction parameters.
///
/// Two keys are equal exactly when the provider and every parameter are equal, so
/// equal keys always resolve to the same cached handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub provider: String,
    pub params: BTreeMap<String, ParamValue>,
}

impl ModelKey {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }
}

impl Display for ModelKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}(", self.provider)?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, ")")
    }
}

/// Where a loaded model currently lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
}

impl Device {
    pub fn from_rank(gpu_rank: Option<usize>) -> Self {
        gpu_rank.map_or(Self::Cpu, Self::Cuda)
    }
}

impl Display for Device {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(rank) => write!(f, "cuda:{rank}"),
        }
    }
}
