use common_error::{SieveError, SieveResult};
use common_resource_request::ResourceRequest;
use sieve_core::{ParamValue, Params};

use crate::{Accelerator, OperatorDescriptor};

/// Parameters every operator accepts in addition to its own schema.
pub const RESERVED_PARAMS: [&str; 6] = [
    "num_proc",
    "cpu_required",
    "mem_required",
    "accelerator",
    "batch_size",
    "text_key",
];

pub const DEFAULT_TEXT_KEY: &str = "text";

/// The reserved parameters of one operator occurrence, after validation.
#[derive(Clone, Debug, PartialEq)]
pub struct CommonParams {
    pub num_proc: Option<usize>,
    pub cpu_required: f64,
    pub mem_required: f64,
    pub accelerator: Accelerator,
    pub batch_size: Option<usize>,
    pub text_key: String,
}

impl CommonParams {
    pub fn for_descriptor(descriptor: &OperatorDescriptor) -> Self {
        Self {
            num_proc: None,
            cpu_required: 1.0,
            mem_required: 0.0,
            accelerator: descriptor.accelerator,
            batch_size: None,
            text_key: DEFAULT_TEXT_KEY.to_string(),
        }
    }

    /// Separates reserved parameters from the operator's own, validating the former.
    pub fn split(descriptor: &OperatorDescriptor, params: &Params) -> SieveResult<(Self, Params)> {
        let op_name = descriptor.name.as_str();
        let mut common = Self::for_descriptor(descriptor);
        let mut own = Params::with_capacity(params.len());

        for (name, value) in params {
            match name.as_str() {
                "num_proc" => {
                    let n = non_negative_int(op_name, name, value)?;
                    common.num_proc = (n > 0).then_some(n);
                }
                "cpu_required" => {
                    common.cpu_required = non_negative_float(op_name, name, value)?;
                    if common.cpu_required <= 0.0 {
                        return Err(invalid(op_name, name, "must be positive"));
                    }
                }
                "mem_required" => common.mem_required = non_negative_float(op_name, name, value)?,
                "accelerator" => {
                    let raw = value
                        .as_str()
                        .ok_or_else(|| invalid(op_name, name, "expected `cpu` or `cuda`"))?;
                    common.accelerator = raw
                        .parse()
                        .map_err(|e: SieveError| invalid(op_name, name, e.to_string()))?;
                }
                "batch_size" => {
                    let n = non_negative_int(op_name, name, value)?;
                    if n == 0 {
                        return Err(invalid(op_name, name, "must be positive"));
                    }
                    common.batch_size = Some(n);
                }
                "text_key" => {
                    common.text_key = value
                        .as_str()
                        .ok_or_else(|| invalid(op_name, name, "expected a field name"))?
                        .to_string();
                }
                _ => {
                    own.insert(name.clone(), value.clone());
                }
            }
        }
        Ok((common, own))
    }

    pub fn resource_request(&self) -> ResourceRequest {
        ResourceRequest::new_internal(
            self.cpu_required,
            self.mem_required,
            self.accelerator == Accelerator::Cuda,
            self.num_proc,
        )
    }
}

fn invalid(op_name: &str, param: &str, reason: impl Into<String>) -> SieveError {
    SieveError::InvalidParameter {
        op_name: op_name.to_string(),
        param: param.to_string(),
        reason: reason.into(),
    }
}

fn non_negative_int(op_name: &str, param: &str, value: &ParamValue) -> SieveResult<usize> {
    value
        .as_i64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| invalid(op_name, param, format!("expected a non-negative int, got `{value}`")))
}

fn non_negative_float(op_name: &str, param: &str, value: &ParamValue) -> SieveResult<f64> {
    value
        .as_f64()
        .filter(|x| x.is_finite() && *x >= 0.0)
        .ok_or_else(|| {
            invalid(
                op_name,
                param,
                format!("expected a non-negative number, got `{value}`"),
            )
        })
}
