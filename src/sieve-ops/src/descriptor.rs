use std::{collections::BTreeSet, fmt::Display, str::FromStr};

use common_error::SieveError;
use serde::{Deserialize, Serialize};

use crate::ParamSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    Mapper,
    Filter,
    Deduplicator,
    Selector,
}

impl OperatorKind {
    pub const ALL: [Self; 4] = [Self::Mapper, Self::Filter, Self::Deduplicator, Self::Selector];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mapper => "mapper",
            Self::Filter => "filter",
            Self::Deduplicator => "deduplicator",
            Self::Selector => "selector",
        }
    }
}

impl Display for OperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorKind {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                SieveError::ValueError(format!(
                    "Unknown operator kind `{s}`, expected one of mapper, filter, deduplicator, selector"
                ))
            })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accelerator {
    #[default]
    Cpu,
    Cuda,
}

impl Display for Accelerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda => f.write_str("cuda"),
        }
    }
}

impl FromStr for Accelerator {
    type Err = SieveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            _ => Err(SieveError::ValueError(format!(
                "Unknown accelerator `{s}`, expected `cpu` or `cuda`"
            ))),
        }
    }
}

/// Static metadata of a registered operator. Immutable once registered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorDescriptor {
    pub name: String,
    pub kind: OperatorKind,
    pub accelerator: Accelerator,
    /// Processes samples in chunks of `batch_size` instead of one at a time.
    pub batched: bool,
    /// Names of per-sample intermediates this operator reads from the context,
    /// e.g. `words` or `lines`. Filters sharing a tag may be fused.
    pub intermediate_tags: BTreeSet<String>,
    pub schema: ParamSchema,
    pub docstring: &'static str,
}

impl OperatorDescriptor {
    pub fn new(name: impl Into<String>, kind: OperatorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            accelerator: Accelerator::Cpu,
            batched: false,
            intermediate_tags: BTreeSet::new(),
            schema: ParamSchema::default(),
            docstring: "",
        }
    }

    #[must_use]
    pub fn with_accelerator(mut self, accelerator: Accelerator) -> Self {
        self.accelerator = accelerator;
        self
    }

    #[must_use]
    pub fn batched(mut self) -> Self {
        self.batched = true;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.intermediate_tags = tags.iter().map(|t| (*t).to_string()).collect();
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = schema;
        self
    }

    #[must_use]
    pub fn with_docstring(mut self, docstring: &'static str) -> Self {
        self.docstring = docstring;
        self
    }

    /// Whether this operator may join a fused group.
    pub fn is_fusable(&self) -> bool {
        self.kind == OperatorKind::Filter && !self.intermediate_tags.is_empty()
    }
}
