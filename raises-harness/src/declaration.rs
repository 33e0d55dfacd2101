//! YAML test declarations.
//!
//! ```yaml
//! classes:
//!   SomeException: Exception
//! marks: [raises]
//! tests:
//!   - name: test_named
//!     marks:
//!       - raises: { exception: SomeException, message: the }
//!     call: { raise: SomeException, message: the message }
//!   - name: test_cases
//!     params:
//!       - id: ok
//!       - id: bad
//!         marks: [{ raises: { exception: SomeException } }]
//!         call: { raise: ValueError, message: x }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use raises::{Class, ClassRegistry, Exception, Marker, MarkerValue};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TestFile {
  /// `name: base` pairs defining classes on top of the built-ins.
  #[serde(default)]
  pub classes: BTreeMap<String, String>,
  /// Markers inherited by every test in the file.
  #[serde(default)]
  pub marks: Vec<MarkDecl>,
  #[serde(default)]
  pub tests: Vec<TestDecl>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TestDecl {
  pub name: String,
  #[serde(default)]
  pub marks: Vec<MarkDecl>,
  #[serde(default)]
  pub setup: Option<BodyDecl>,
  #[serde(default)]
  pub call: Option<BodyDecl>,
  #[serde(default)]
  pub skip: Option<String>,
  #[serde(default)]
  pub params: Vec<ParamDecl>,
}

/// One parametrized case. Its bodies replace the test's, and its marks take precedence.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ParamDecl {
  pub id: String,
  #[serde(default)]
  pub marks: Vec<MarkDecl>,
  #[serde(default)]
  pub setup: Option<BodyDecl>,
  #[serde(default)]
  pub call: Option<BodyDecl>,
}

/// What a phase does: raise an exception, or return (optionally with a value).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BodyDecl {
  #[serde(default, rename = "raise")]
  pub raise: Option<String>,
  #[serde(default)]
  pub message: String,
  #[serde(default, rename = "return")]
  pub returns: Option<String>,
}

/// `raises` or `{ raises: { exception: ValueError } }`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MarkDecl {
  Bare(String),
  WithArgs(BTreeMap<String, Option<BTreeMap<String, Value>>>),
}

pub fn parse_test_file(raw: &str) -> Result<TestFile> {
  if raw.trim().is_empty() {
    return Ok(TestFile::default());
  }
  serde_yaml::from_str(raw).context("deserialize test declaration YAML")
}

impl TestFile {
  /// The built-in classes plus this file's `classes`, defined in dependency order.
  pub fn class_registry(&self) -> Result<ClassRegistry> {
    let mut registry = ClassRegistry::with_builtins();
    let mut pending: Vec<(&String, &String)> = self.classes.iter().collect();

    while !pending.is_empty() {
      let before = pending.len();
      let mut deferred = Vec::new();
      for (name, base) in pending {
        if registry.get(base).is_some() {
          registry.define(name, base)?;
        } else {
          deferred.push((name, base));
        }
      }
      if deferred.len() == before {
        let (name, base) = deferred[0];
        bail!("class `{name}` derives from unknown class `{base}`");
      }
      pending = deferred;
    }

    Ok(registry)
  }
}

impl MarkDecl {
  pub fn name(&self) -> Result<&str> {
    match self {
      MarkDecl::Bare(name) => Ok(name.as_str()),
      MarkDecl::WithArgs(map) => {
        let mut keys = map.keys();
        match (keys.next(), keys.next()) {
          (Some(name), None) => Ok(name.as_str()),
          _ => bail!("a mark must be a name or a single-key map, got {} keys", map.len()),
        }
      }
    }
  }

  pub fn to_marker(&self, classes: &ClassRegistry) -> Result<Marker> {
    let name = self.name()?;
    let mut marker = Marker::new(name);
    if let MarkDecl::WithArgs(map) = self {
      for (key, value) in map.values().flatten().flat_map(|kwargs| kwargs.iter()) {
        let value = marker_value(key, value, classes)
          .with_context(|| format!("mark `{name}` argument `{key}`"))?;
        marker = marker.with_kwarg(key.clone(), value);
      }
    }
    Ok(marker)
  }
}

fn marker_value(key: &str, value: &Value, classes: &ClassRegistry) -> Result<MarkerValue> {
  Ok(match value {
    Value::Null => MarkerValue::None,
    Value::Bool(v) => MarkerValue::Bool(*v),
    Value::Number(n) => MarkerValue::Int(
      n.as_i64()
        .ok_or_else(|| anyhow!("only integer numbers are supported, got {n}"))?,
    ),
    // Only `exception` names a class; other keys (`message`, `match`) are plain strings.
    Value::String(s) if key == "exception" => MarkerValue::Class(lookup_class(classes, s)?),
    Value::String(s) => MarkerValue::Str(s.clone()),
    Value::Mapping(map) => {
      let instance = map
        .get("instance")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("expected `{{ instance: <Class>, message: <text> }}`"))?;
      let message = map.get("message").and_then(Value::as_str).unwrap_or("");
      MarkerValue::Instance(new_exception(classes, instance, message)?)
    }
    other => bail!("unsupported value {other:?}"),
  })
}

fn lookup_class(classes: &ClassRegistry, name: &str) -> Result<Class> {
  classes
    .get(name)
    .cloned()
    .ok_or_else(|| anyhow!("unknown class `{name}`"))
}

pub fn new_exception(classes: &ClassRegistry, name: &str, message: &str) -> Result<Exception> {
  let class = lookup_class(classes, name)?;
  if !class.is_exception_class() {
    bail!("class `{name}` is not an exception class and cannot be raised");
  }
  Ok(class.instantiate(message))
}
