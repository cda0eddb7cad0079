//! Deterministic composite cache keys.
//!
//! A key is built from an ordered sequence of `(label, value)` parts, e.g.
//! `project:PROJ:issue:123:version:1.0`. Equal part sequences always produce
//! equal keys; callers are responsible for using a consistent part order.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

use super::error::{CacheError, Result};

/// Separator between labels and values.
pub const KEY_DELIMITER: char = ':';

/// Opaque cache key produced by [`KeyBuilder`] or [`build_key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl AsRef<str> for CacheKey {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl From<CacheKey> for String {
  fn from(key: CacheKey) -> Self {
    key.0
  }
}

/// Builder for keys whose parts have different value types.
///
/// ```ignore
/// let key = KeyBuilder::new()
///   .part("project", "PROJ")
///   .part("issue", 123)
///   .build()?;
/// assert_eq!(key.as_str(), "project:PROJ:issue:123");
/// ```
#[derive(Debug, Clone, Default)]
pub struct KeyBuilder {
  parts: Vec<(String, Value)>,
  invalid: Option<String>,
}

impl KeyBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a `(label, value)` pair.
  pub fn part<V: Serialize>(mut self, label: impl Into<String>, value: V) -> Self {
    let label = label.into();
    match serde_json::to_value(value) {
      Ok(value) => self.parts.push((label, value)),
      Err(e) => {
        // Keep the first failure; build() reports it.
        self
          .invalid
          .get_or_insert_with(|| format!("part `{}` is not encodable: {}", label, e));
      }
    }
    self
  }

  pub fn build(&self) -> Result<CacheKey> {
    if let Some(reason) = &self.invalid {
      return Err(CacheError::InvalidKey(reason.clone()));
    }
    build_key(self.parts.iter().map(|(l, v)| (l.as_str(), v.clone())))
  }

  /// Fixed-length variant: `<first label>:<sha256 of the full key>`.
  ///
  /// Used for free-text inputs (search queries) that would otherwise make
  /// arbitrarily long keys.
  pub fn build_digest(&self) -> Result<CacheKey> {
    let key = self.build()?;
    let first_label = self.parts.first().map(|(l, _)| l.as_str()).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    let digest = hex::encode(hasher.finalize());

    Ok(CacheKey(format!(
      "{}{}{}",
      escape(first_label),
      KEY_DELIMITER,
      digest
    )))
  }
}

/// Build a key from `(label, value)` pairs.
///
/// Fails with [`CacheError::InvalidKey`] when the sequence is empty or a label
/// is empty.
pub fn build_key<I, L>(parts: I) -> Result<CacheKey>
where
  I: IntoIterator<Item = (L, Value)>,
  L: AsRef<str>,
{
  let mut key = String::new();
  let mut count = 0usize;

  for (label, value) in parts {
    let label = label.as_ref();
    if label.is_empty() {
      return Err(CacheError::InvalidKey(format!(
        "part {} has an empty label",
        count
      )));
    }
    if count > 0 {
      key.push(KEY_DELIMITER);
    }
    key.push_str(&escape(label));
    key.push(KEY_DELIMITER);
    key.push_str(&escape(&canonical_string(&value)));
    count += 1;
  }

  if count == 0 {
    return Err(CacheError::InvalidKey(
      "at least one (label, value) part is required".to_string(),
    ));
  }

  Ok(CacheKey(key))
}

/// Canonical string form of a key value.
fn canonical_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    Value::Null => "null".to_string(),
    Value::Array(_) | Value::Object(_) => {
      let mut out = String::new();
      write_canonical_json(value, &mut out);
      out
    }
  }
}

/// Compact JSON with object keys sorted at every depth.
fn write_canonical_json(value: &Value, out: &mut String) {
  match value {
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical_json(item, out);
      }
      out.push(']');
    }
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical_json(v, out);
      }
      out.push('}');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}

/// Percent-escape `%` and the delimiter so parts can't run together.
fn escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '%' => out.push_str("%25"),
      KEY_DELIMITER => out.push_str("%3A"),
      c => out.push(c),
    }
  }
  out
}
