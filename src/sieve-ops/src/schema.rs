use std::fmt::Display;

use common_error::{SieveError, SieveResult};
use itertools::Itertools;
use serde::de::DeserializeOwned;
use sieve_core::{ParamValue, Params};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    StrList,
}

impl ParamType {
    /// Normalizes `value` to this type, or `None` if it does not fit.
    /// Ints are accepted where floats are declared.
    fn coerce(self, value: &ParamValue) -> Option<ParamValue> {
        match (self, value) {
            (Self::Bool, ParamValue::Bool(_))
            | (Self::Int, ParamValue::Int(_))
            | (Self::Float, ParamValue::Float(_))
            | (Self::Str, ParamValue::Str(_)) => Some(value.clone()),
            (Self::Float, ParamValue::Int(i)) => Some(ParamValue::Float(*i as f64)),
            (Self::StrList, ParamValue::List(items))
                if items.iter().all(|item| matches!(item, ParamValue::Str(_))) =>
            {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

impl Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "string",
            Self::StrList => "list of strings",
        };
        f.write_str(name)
    }
}

/// One declared operator parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub default: Option<ParamValue>,
    /// When non-empty, the only values accepted.
    pub allowed: Vec<ParamValue>,
    pub required: bool,
    pub doc: &'static str,
}

impl ParamSpec {
    pub fn new(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            default: None,
            allowed: vec![],
            required: false,
            doc: "",
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: impl Into<ParamValue>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn one_of<V: Into<ParamValue>>(mut self, allowed: impl IntoIterator<Item = V>) -> Self {
        self.allowed = allowed.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }
}

/// The full parameter surface of an operator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParamSchema {
    specs: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        Self { specs }
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    /// Checks `params` against the schema and fills in defaults.
    ///
    /// Rejects unknown names, missing required parameters, mistyped values and values
    /// outside a declared set. The result is in schema order.
    pub fn validate(&self, op_name: &str, params: &Params) -> SieveResult<Params> {
        let invalid = |param: &str, reason: String| SieveError::InvalidParameter {
            op_name: op_name.to_string(),
            param: param.to_string(),
            reason,
        };

        if let Some(unknown) = params.keys().find(|name| self.get(name).is_none()) {
            let known = self.specs.iter().map(|spec| spec.name).join(", ");
            return Err(invalid(
                unknown,
                format!("unknown parameter, expected one of [{known}]"),
            ));
        }

        let mut resolved = Params::with_capacity(self.specs.len());
        for spec in &self.specs {
            let value = match params.get(spec.name) {
                Some(value) => spec.ty.coerce(value).ok_or_else(|| {
                    invalid(
                        spec.name,
                        format!("expected {}, got {} `{}`", spec.ty, value.type_name(), value),
                    )
                })?,
                None => match &spec.default {
                    Some(default) => default.clone(),
                    None if spec.required => {
                        return Err(invalid(spec.name, "required parameter is missing".into()))
                    }
                    None => continue,
                },
            };
            if !spec.allowed.is_empty() && !spec.allowed.contains(&value) {
                let allowed = spec.allowed.iter().join(", ");
                return Err(invalid(
                    spec.name,
                    format!("`{value}` is not one of [{allowed}]"),
                ));
            }
            resolved.insert(spec.name.to_string(), value);
        }
        Ok(resolved)
    }
}

/// Deserializes validated parameters into an operator's config struct.
pub fn bind_params<T: DeserializeOwned>(op_name: &str, params: &Params) -> SieveResult<T> {
    let object = params
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect::<serde_json::Map<_, _>>();
    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        SieveError::InvalidParameter {
            op_name: op_name.to_string(),
            param: "config".to_string(),
            reason: e.to_string(),
        }
    })
}
