//! In-memory tabular model shared by every stage of the pipeline.

use crate::error::{DatasetError, StepError, StepResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use strsim::jaro_winkler;

/// Largest magnitude that still round-trips through an `i64` without losing precision.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A single cell. Columns are not typed, so any row may hold any variant.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Types raw cell text the way ingestion does: empty is null, `true`/`false` are
    /// booleans, anything that parses as a finite float is a number. Text is stored trimmed.
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if trimmed.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Value::Number(n),
            _ => Value::Text(trimmed.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view. Text counts when it parses as a number; booleans do not.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) if n.is_finite() => Some(*n),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
        }
    }

    /// Total order used by sorting: null < bool < number < text.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

pub(crate) fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::Text(s),
            // Nested structures are kept as their compact JSON text.
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

/// Headers plus rows. Every row has exactly one value per header; construction and
/// deserialization both enforce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    headers: Vec<String>,
    #[serde(rename = "data")]
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct RawDataset {
    headers: Vec<String>,
    #[serde(alias = "rows", default)]
    data: Vec<Vec<Value>>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = DatasetError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        Dataset::new(raw.headers, raw.data)
    }
}

impl Dataset {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, DatasetError> {
        let dataset = Self { headers, rows };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Same headers, different rows. Used by tools that only drop or reorder rows.
    pub fn with_rows(&self, rows: Vec<Vec<Value>>) -> Result<Self, DatasetError> {
        Self::new(self.headers.clone(), rows)
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.headers.is_empty() {
            return Err(DatasetError::NoHeaders);
        }
        let mut seen = HashSet::with_capacity(self.headers.len());
        for (idx, header) in self.headers.iter().enumerate() {
            if header.trim().is_empty() {
                return Err(DatasetError::EmptyHeader(idx));
            }
            if !seen.insert(header.as_str()) {
                return Err(DatasetError::DuplicateHeader(header.clone()));
            }
        }
        let expected = self.headers.len();
        for (row, values) in self.rows.iter().enumerate() {
            if values.len() != expected {
                return Err(DatasetError::RaggedRow {
                    row,
                    expected,
                    found: values.len(),
                });
            }
        }
        Ok(())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.headers, self.rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Like [`column_index`](Self::column_index) but fails with the closest header as a hint.
    pub fn require_column(&self, name: &str) -> StepResult<usize> {
        self.column_index(name).ok_or_else(|| StepError::MissingColumn {
            column: name.to_string(),
            suggestion: self.closest_header(name),
        })
    }

    fn closest_header(&self, name: &str) -> Option<String> {
        let needle = name.to_lowercase();
        self.headers
            .iter()
            .map(|h| (h, jaro_winkler(&needle, &h.to_lowercase())))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(h, _)| h.clone())
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().map(move |row| &row[idx])
    }

    /// First `n` rows, for prompt previews.
    pub fn sample(&self, n: usize) -> &[Vec<Value>] {
        &self.rows[..n.min(self.rows.len())]
    }
}
