use common_error::{SieveError, SieveResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved field under which per-sample statistics are serialized.
pub const STATS_FIELD: &str = "__stats__";

/// One row of a dataset: arbitrary JSON fields plus a statistics namespace that
/// filters write into.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(rename = "__stats__", default, skip_serializing_if = "Map::is_empty")]
    stats: Map<String, Value>,
}

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            stats: Map::new(),
        }
    }

    /// Splits a JSON object into fields and the reserved stats namespace.
    pub fn from_value(value: Value) -> SieveResult<Self> {
        match value {
            Value::Object(mut fields) => {
                let stats = match fields.shift_remove(STATS_FIELD) {
                    None => Map::new(),
                    Some(Value::Object(stats)) => stats,
                    Some(other) => {
                        return Err(SieveError::TypeError(format!(
                            "`{STATS_FIELD}` must be an object, got {other}"
                        )))
                    }
                };
                Ok(Self { fields, stats })
            }
            other => Err(SieveError::TypeError(format!(
                "Samples must be JSON objects, got {other}"
            ))),
        }
    }

    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        if !self.stats.is_empty() {
            fields.insert(STATS_FIELD.to_string(), Value::Object(self.stats));
        }
        Value::Object(fields)
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn stats(&self) -> &Map<String, Value> {
        &self.stats
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    /// Reads a string field, failing when it is absent or not a string.
    pub fn get_str(&self, key: &str) -> SieveResult<&str> {
        match self.fields.get(key) {
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(SieveError::TypeError(format!(
                "Field `{key}` must be a string, got {other}"
            ))),
            None => Err(SieveError::FieldNotFound(format!(
                "Field `{key}` not found in sample"
            ))),
        }
    }

    pub fn stat(&self, name: &str) -> Option<&Value> {
        self.stats.get(name)
    }

    pub fn stat_f64(&self, name: &str) -> Option<f64> {
        self.stats.get(name).and_then(Value::as_f64)
    }

    pub fn has_stat(&self, name: &str) -> bool {
        self.stats.contains_key(name)
    }

    pub fn set_stat(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.stats.insert(name.into(), value.into());
    }

    pub fn remove_stat(&mut self, name: &str) -> Option<Value> {
        self.stats.remove(name)
    }
}
