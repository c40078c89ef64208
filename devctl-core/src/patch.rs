//! Dotted-path edits on an untyped nested config.

use crate::error::{DevctlError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The config plugins mutate: a JSON object of arbitrary depth.
pub type Config = Map<String, Value>;

/// Keys to set and keys to remove, both in dotted form (`services.web.port`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub set: BTreeMap<String, Value>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set.insert(key.into(), value);
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }
}

/// Splits a dotted key, ignoring empty segments.
fn segments(key: &str) -> Result<Vec<&str>> {
    let parts: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
    if parts.is_empty() {
        return Err(DevctlError::EmptyKey);
    }
    Ok(parts)
}

/// Applies `patch` to a copy of `config`: unsets first, then sets.
pub fn apply(config: &Config, patch: &ConfigPatch) -> Result<Config> {
    let mut out = config.clone();
    for key in &patch.unset {
        unset_path(&mut out, key)?;
    }
    for (key, value) in &patch.set {
        set_path(&mut out, key, value.clone())?;
    }
    Ok(out)
}

/// Combines two patches so that applying the result equals applying `a`
/// then `b` whenever they touch disjoint paths.
pub fn merge(a: &ConfigPatch, b: &ConfigPatch) -> ConfigPatch {
    let mut set = a.set.clone();
    set.extend(b.set.iter().map(|(k, v)| (k.clone(), v.clone())));
    let mut unset: Vec<String> = Vec::with_capacity(a.unset.len() + b.unset.len());
    for key in a.unset.iter().chain(&b.unset) {
        if !unset.contains(key) {
            unset.push(key.clone());
        }
    }
    ConfigPatch { set, unset }
}

pub fn set_path(config: &mut Config, key: &str, value: Value) -> Result<()> {
    let parts = segments(key)?;
    let (last, parents) = match parts.split_last() {
        Some(split) => split,
        None => return Err(DevctlError::EmptyKey),
    };
    let mut cur = config;
    for seg in parents {
        let next = cur
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        cur = match next {
            Value::Object(map) => map,
            _ => {
                return Err(DevctlError::NotAnObject {
                    action: "set",
                    key: key.to_string(),
                    segment: seg.to_string(),
                })
            }
        };
    }
    cur.insert(last.to_string(), value);
    Ok(())
}

pub fn unset_path(config: &mut Config, key: &str) -> Result<()> {
    let parts = segments(key)?;
    let (last, parents) = match parts.split_last() {
        Some(split) => split,
        None => return Err(DevctlError::EmptyKey),
    };
    let mut cur = config;
    for seg in parents {
        cur = match cur.get_mut(*seg) {
            None => return Ok(()),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(DevctlError::NotAnObject {
                    action: "unset",
                    key: key.to_string(),
                    segment: seg.to_string(),
                })
            }
        };
    }
    cur.remove(*last);
    Ok(())
}

/// Reads the value at a dotted path, if every segment exists.
pub fn get_path<'a>(config: &'a Config, key: &str) -> Option<&'a Value> {
    let parts = segments(key).ok()?;
    let (last, parents) = parts.split_last()?;
    let mut cur = config;
    for seg in parents {
        cur = cur.get(*seg)?.as_object()?;
    }
    cur.get(*last)
}
