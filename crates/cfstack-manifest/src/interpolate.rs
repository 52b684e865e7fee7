//! `((var))` interpolation
//!
//! Runs in two passes over the parsed YAML tree: the first collects every
//! placeholder and fails if any cannot be resolved, the second substitutes.
//! A placeholder that makes up a whole scalar takes the variable's typed
//! value; one embedded in a longer string is replaced textually.

use crate::error::{ManifestError, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Variables keyed by top-level name
pub type Variables = BTreeMap<String, Value>;

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\(\(([-\w./:]+)\)\)").unwrap_or_else(|e| panic!("placeholder pattern: {e}"))
    })
}

/// Variable sources with their precedence
///
/// Inline variables win over vars files; among files, later ones win.
#[derive(Debug, Default, Clone)]
pub struct Interpolator {
    file_vars: Variables,
    inline_vars: Variables,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an inline variable.
    pub fn add_var(&mut self, name: impl Into<String>, value: Value) {
        self.inline_vars.insert(name.into(), value);
    }

    /// Parse and set a `name=value` inline variable, typed as by [`scalar`].
    pub fn add_inline(&mut self, pair: &str) -> Result<()> {
        let (name, value) = pair
            .split_once('=')
            .filter(|(name, _)| !name.trim().is_empty())
            .ok_or_else(|| ManifestError::InvalidVariable(pair.to_string()))?;
        self.add_var(name.trim(), scalar(value));
        Ok(())
    }

    /// Merge a YAML vars file over the files loaded before it.
    #[tracing::instrument(skip(self))]
    pub fn add_vars_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let parsed: Value =
            serde_yaml::from_str(&content).map_err(|e| ManifestError::InvalidYaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        let mapping = match parsed {
            Value::Mapping(m) => m,
            Value::Null => Mapping::new(),
            _ => return Err(ManifestError::InvalidVarsFile(path.to_path_buf())),
        };

        let mut count = 0;
        for (key, value) in mapping {
            if let Some(name) = scalar_text(&key) {
                self.file_vars.insert(name, value);
                count += 1;
            }
        }
        info!(vars_file = %path.display(), variable_count = count, "loaded vars file");
        Ok(())
    }

    fn lookup(&self, reference: &str) -> Option<&Value> {
        let mut segments = reference.split('.');
        let head = segments.next()?;
        let mut current = self
            .inline_vars
            .get(head)
            .or_else(|| self.file_vars.get(head))?;
        for segment in segments {
            current = match current {
                Value::Mapping(m) => m.get(segment)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Interpolate every placeholder in `doc`.
    pub fn interpolate(&self, doc: Value) -> Result<Value> {
        let mut referenced = BTreeSet::new();
        collect(&doc, &mut referenced);

        let missing: Vec<String> = referenced
            .iter()
            .filter(|name| self.lookup(name).is_none())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ManifestError::Interpolation { missing });
        }
        debug!(placeholders = referenced.len(), "all placeholders resolved");
        self.substitute(doc)
    }

    /// Parse `yaml` (read from `origin`) and interpolate it.
    pub fn interpolate_str(&self, yaml: &str, origin: &Path) -> Result<Value> {
        let doc: Value = serde_yaml::from_str(yaml).map_err(|e| ManifestError::InvalidYaml {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        self.interpolate(doc)
    }

    fn substitute(&self, value: Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => self.substitute_str(s)?,
            Value::Sequence(seq) => Value::Sequence(
                seq.into_iter()
                    .map(|v| self.substitute(v))
                    .collect::<Result<_>>()?,
            ),
            Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(self.substitute(k)?, self.substitute(v)?);
                }
                Value::Mapping(out)
            }
            Value::Tagged(mut tagged) => {
                tagged.value = self.substitute(tagged.value)?;
                Value::Tagged(tagged)
            }
            other => other,
        })
    }

    fn substitute_str(&self, s: String) -> Result<Value> {
        let re = placeholder();
        if let Some(caps) = re.captures(&s)
            && caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len())
        {
            return Ok(self.lookup(&caps[1]).cloned().unwrap_or(Value::Null));
        }
        if !re.is_match(&s) {
            return Ok(Value::String(s));
        }

        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in re.captures_iter(&s) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&s[last..whole.start()]);
            let name = &caps[1];
            let value = self.lookup(name).unwrap_or(&Value::Null);
            let text = scalar_text(value)
                .ok_or_else(|| ManifestError::NonScalarVariable(name.to_string()))?;
            out.push_str(&text);
            last = whole.end();
        }
        out.push_str(&s[last..]);
        Ok(Value::String(out))
    }
}

/// Type an inline value the way YAML would read it.
///
/// `3` becomes a number and `true` a bool, so `instances: ((n))` parses.
/// Anything whose typed form would print differently (`007`, `True`,
/// `512M`, `[a]`) stays the original string.
pub fn scalar(text: &str) -> Value {
    match serde_yaml::from_str::<Value>(text) {
        Ok(typed @ (Value::Number(_) | Value::Bool(_)))
            if scalar_text(&typed).as_deref() == Some(text) =>
        {
            typed
        }
        _ => Value::String(text.to_string()),
    }
}

fn collect(value: &Value, into: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            for caps in placeholder().captures_iter(s) {
                into.insert(caps[1].to_string());
            }
        }
        Value::Sequence(seq) => seq.iter().for_each(|v| collect(v, into)),
        Value::Mapping(map) => {
            for (k, v) in map {
                collect(k, into);
                collect(v, into);
            }
        }
        Value::Tagged(tagged) => collect(&tagged.value, into),
        _ => {}
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
