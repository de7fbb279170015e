use std::path::{Path, PathBuf};

use common_error::{SieveError, SieveResult};
use common_sieve_config::SieveExecutionConfig;
use indexmap::IndexMap;
use serde::{
    de::Error as _,
    ser::{SerializeMap, SerializeSeq},
    Deserialize, Deserializer, Serialize, Serializer,
};
use sieve_core::{ParamValue, Params};

/// One operator occurrence in a recipe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpConfig {
    pub name: String,
    pub params: Params,
}

impl OpConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Ordered list of operator occurrences.
///
/// Serialized as the `process:` list of a recipe file, one single-key map per
/// operator: `- words_num_filter: {min_num: 5}`. A bare name is accepted for
/// operators without parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recipe {
    ops: Vec<OpConfig>,
}

impl Recipe {
    pub fn new(ops: Vec<OpConfig>) -> Self {
        Self { ops }
    }

    #[must_use]
    pub fn with_op(mut self, op: OpConfig) -> Self {
        self.ops.push(op);
        self
    }

    pub fn ops(&self) -> &[OpConfig] {
        &self.ops
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OpConfig> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Sets `text_key` on every operator that does not set its own.
    #[must_use]
    pub fn with_text_key(mut self, text_key: &str) -> Self {
        for op in &mut self.ops {
            op.params
                .entry("text_key".to_string())
                .or_insert_with(|| ParamValue::from(text_key));
        }
        self
    }
}

impl Serialize for Recipe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Entry<'a>(&'a OpConfig);

        impl Serialize for Entry<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(&self.0.name, &self.0.params)?;
                map.end()
            }
        }

        let mut seq = serializer.serialize_seq(Some(self.ops.len()))?;
        for op in &self.ops {
            seq.serialize_element(&Entry(op))?;
        }
        seq.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOp {
    Name(String),
    Config(IndexMap<String, Option<Params>>),
}

impl<'de> Deserialize<'de> for Recipe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<RawOp>::deserialize(deserializer)?;
        let ops = raw
            .into_iter()
            .enumerate()
            .map(|(i, op)| match op {
                RawOp::Name(name) => Ok(OpConfig::new(name)),
                RawOp::Config(map) if map.len() == 1 => {
                    let (name, params) = map.into_iter().next().ok_or_else(|| {
                        D::Error::custom(format!("process[{i}] is an empty mapping"))
                    })?;
                    Ok(OpConfig {
                        name,
                        params: params.unwrap_or_default(),
                    })
                }
                RawOp::Config(map) => Err(D::Error::custom(format!(
                    "process[{i}] must name exactly one operator, found {}",
                    map.len()
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ops })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecipeFormat {
    Json,
    Yaml,
}

impl RecipeFormat {
    /// `.json` is JSON; everything else is read as YAML, which also accepts JSON.
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// A recipe file: global settings plus the `process` list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeFile {
    pub project_name: Option<String>,
    pub dataset_path: Option<PathBuf>,
    pub export_path: Option<PathBuf>,
    /// Recipe-wide worker count for operators that do not set `num_proc`.
    pub np: Option<usize>,
    pub op_fusion: Option<bool>,
    pub text_key: Option<String>,
    #[serde(default)]
    pub process: Recipe,
}

impl RecipeFile {
    pub fn load(path: impl AsRef<Path>) -> SieveResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SieveError::ValueError(format!(
                "Recipe file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let recipe = Self::parse(&content, RecipeFormat::from_extension(path))?;
        log::info!(
            "Loaded recipe {} with {} operators",
            path.display(),
            recipe.process.len()
        );
        Ok(recipe)
    }

    pub fn parse(content: &str, format: RecipeFormat) -> SieveResult<Self> {
        match format {
            RecipeFormat::Json => Ok(serde_json::from_str(content)?),
            RecipeFormat::Yaml => Ok(serde_yaml::from_str(content)?),
        }
    }

    /// The operator list with the file's `text_key` applied.
    pub fn recipe(&self) -> Recipe {
        match &self.text_key {
            Some(text_key) => self.process.clone().with_text_key(text_key),
            None => self.process.clone(),
        }
    }

    /// Layers the file's global settings over an execution config.
    pub fn apply_to(&self, config: SieveExecutionConfig) -> SieveExecutionConfig {
        let mut config = config;
        if let Some(op_fusion) = self.op_fusion {
            config = config.with_op_fusion(op_fusion);
        }
        if self.np.is_some() {
            config = config.with_default_num_proc(self.np);
        }
        config
    }
}
