//! YAML configuration loader with `$include` and `${ENV:default}` support.
//!
//! Carried over close to verbatim from the reference service's
//! `config/loader.rs`: `$include` directives for file composition,
//! `${ENV_VAR:default}` environment expansion, and a `deep_merge` for
//! layering an environment-specific override file over a base config.

use crate::{OrchestratorError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::env;
use std::fs;
use std::path::Path;

/// Load and parse a YAML file with includes resolved and variables expanded.
pub fn load_yaml_file<P: AsRef<Path>>(path: P) -> Result<YamlValue> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .map_err(|e| OrchestratorError::Config(format!("failed to read {:?}: {}", path, e)))?;

    let mut value: YamlValue = serde_yaml::from_str(&content)
        .map_err(|e| OrchestratorError::Config(format!("failed to parse {:?}: {}", path, e)))?;

    let base_dir = path
        .parent()
        .ok_or_else(|| OrchestratorError::Config("config path has no parent directory".to_string()))?;

    process_includes(&mut value, base_dir)?;
    expand_variables(&mut value);

    Ok(value)
}

/// Load and deserialize a YAML file into `T`, e.g. [`super::RuntimeConfig`].
pub fn load_yaml_config<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let yaml = load_yaml_file(path)?;
    let json = yaml_to_json(&yaml)?;
    serde_json::from_value(json).map_err(|e| OrchestratorError::Config(format!("invalid configuration: {}", e)))
}

/// Load a base config and deep-merge an optional override file over it,
/// e.g. a per-environment file layered over the shared defaults.
pub fn load_yaml_config_with_override<T: DeserializeOwned, P: AsRef<Path>>(
    base_path: P,
    override_path: Option<P>,
) -> Result<T> {
    let mut base = load_yaml_file(base_path)?;
    if let Some(override_path) = override_path {
        if override_path.as_ref().exists() {
            let overlay = load_yaml_file(override_path)?;
            deep_merge(&mut base, &overlay);
        }
    }
    let json = yaml_to_json(&base)?;
    serde_json::from_value(json).map_err(|e| OrchestratorError::Config(format!("invalid configuration: {}", e)))
}

fn process_includes(value: &mut YamlValue, base_dir: &Path) -> Result<()> {
    match value {
        YamlValue::Mapping(map) => {
            if let Some(YamlValue::String(include_path)) =
                map.get(&YamlValue::String("$include".to_string()))
            {
                let included = load_yaml_file(base_dir.join(include_path))?;
                *value = included;
                return Ok(());
            }
            for (_, v) in map.iter_mut() {
                process_includes(v, base_dir)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                process_includes(item, base_dir)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// Expands `${ENV_VAR:default}` occurrences in a string.
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let re = regex::Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;
    let mut result = s.to_string();
    for cap in re.captures_iter(s) {
        let full_match = cap.get(0)?.as_str();
        let var_name = cap.get(1)?.as_str();
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        let value = env::var(var_name).unwrap_or_else(|_| default_value.to_string());
        result = result.replace(full_match, &value);
    }
    Some(result)
}

fn yaml_to_json(yaml: &YamlValue) -> Result<JsonValue> {
    match yaml {
        YamlValue::Null => Ok(JsonValue::Null),
        YamlValue::Bool(b) => Ok(JsonValue::Bool(*b)),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsonValue::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(JsonValue::Number(u.into()))
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(JsonValue::Number)
                    .ok_or_else(|| OrchestratorError::Config(format!("invalid number: {f}")))
            } else {
                Err(OrchestratorError::Config("invalid number".to_string()))
            }
        }
        YamlValue::String(s) => Ok(JsonValue::String(s.clone())),
        YamlValue::Sequence(seq) => {
            let json_seq: Result<Vec<JsonValue>> = seq.iter().map(yaml_to_json).collect();
            Ok(JsonValue::Array(json_seq?))
        }
        YamlValue::Mapping(map) => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                let key = match k {
                    YamlValue::String(s) => s.clone(),
                    _ => return Err(OrchestratorError::Config("map keys must be strings".to_string())),
                };
                json_map.insert(key, yaml_to_json(v)?);
            }
            Ok(JsonValue::Object(json_map))
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Deep-merges `other` into `base`: mappings merge key by key recursively;
/// any other type is simply overridden by `other`.
pub fn deep_merge(base: &mut YamlValue, other: &YamlValue) {
    match (base, other) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                if let Some(base_value) = base_map.get_mut(key) {
                    deep_merge(base_value, other_value);
                } else {
                    base_map.insert(key.clone(), other_value.clone());
                }
            }
        }
        (base, other) => {
            *base = other.clone();
        }
    }
}
