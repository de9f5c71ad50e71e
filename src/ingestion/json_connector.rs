//! JSON Connector - JSON payloads to a dataset
//!
//! Accepted shapes:
//! - an array of objects (headers are the union of keys, in first-seen order)
//! - a single object (one row)
//! - a `{"headers": [...], "data": [[...]]}` table (`rows` also accepted)
//! - an array of arrays whose first element is the header row

use crate::dataset::{Dataset, Value};
use crate::error::{DatasetError, IngestError};
use crate::ingestion::DatasetSource;
use indexmap::IndexSet;
use serde_json::{Map, Value as JsonValue};

pub struct JsonConnector {
    json_text: String,
}

impl JsonConnector {
    pub fn new(json_text: String) -> Self {
        Self { json_text }
    }

    /// Converts an already-parsed payload.
    pub fn from_value(payload: JsonValue) -> Result<Dataset, IngestError> {
        match payload {
            JsonValue::Array(items) => Self::from_array(items),
            JsonValue::Object(obj) if is_table_object(&obj) => {
                Ok(serde_json::from_value::<Dataset>(JsonValue::Object(obj))?)
            }
            JsonValue::Object(obj) => Self::from_objects(vec![obj]),
            other => Err(DatasetError::UnsupportedShape(format!(
                "expected a JSON array or object, got {}",
                json_type_name(&other)
            ))
            .into()),
        }
    }

    fn from_array(items: Vec<JsonValue>) -> Result<Dataset, IngestError> {
        match items.first() {
            None => Err(DatasetError::UnsupportedShape("empty array has no headers".to_string()).into()),
            Some(JsonValue::Object(_)) => {
                let mut objects = Vec::with_capacity(items.len());
                for (idx, item) in items.into_iter().enumerate() {
                    match item {
                        JsonValue::Object(obj) => objects.push(obj),
                        other => {
                            return Err(DatasetError::UnsupportedShape(format!(
                                "element {} is {}, expected an object",
                                idx,
                                json_type_name(&other)
                            ))
                            .into())
                        }
                    }
                }
                Self::from_objects(objects)
            }
            Some(JsonValue::Array(_)) => Self::from_nested_arrays(items),
            Some(other) => Err(DatasetError::UnsupportedShape(format!(
                "array of {} cannot be read as rows",
                json_type_name(other)
            ))
            .into()),
        }
    }

    fn from_objects(objects: Vec<Map<String, JsonValue>>) -> Result<Dataset, IngestError> {
        let mut headers: IndexSet<String> = IndexSet::new();
        for obj in &objects {
            for key in obj.keys() {
                headers.insert(key.clone());
            }
        }

        let rows = objects
            .into_iter()
            .map(|mut obj| {
                headers
                    .iter()
                    .map(|h| obj.remove(h).map(Value::from).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Dataset::new(headers.into_iter().collect(), rows)?)
    }

    fn from_nested_arrays(items: Vec<JsonValue>) -> Result<Dataset, IngestError> {
        let mut iter = items.into_iter();
        let headers = match iter.next() {
            Some(JsonValue::Array(cells)) => cells
                .into_iter()
                .map(|c| match c {
                    JsonValue::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            _ => return Err(DatasetError::NoHeaders.into()),
        };

        let mut rows = Vec::new();
        for (idx, item) in iter.enumerate() {
            match item {
                JsonValue::Array(cells) => rows.push(cells.into_iter().map(Value::from).collect()),
                other => {
                    return Err(DatasetError::UnsupportedShape(format!(
                        "row {} is {}, expected an array",
                        idx,
                        json_type_name(&other)
                    ))
                    .into())
                }
            }
        }

        Ok(Dataset::new(headers, rows)?)
    }
}

impl DatasetSource for JsonConnector {
    fn source_type(&self) -> &str {
        "json"
    }

    fn load(&self) -> Result<Dataset, IngestError> {
        let payload: JsonValue = serde_json::from_str(&self.json_text)?;
        Self::from_value(payload)
    }
}

fn is_table_object(obj: &Map<String, JsonValue>) -> bool {
    matches!(obj.get("headers"), Some(JsonValue::Array(_)))
        && (obj.contains_key("data") || obj.contains_key("rows"))
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(text: &str) -> Result<Dataset, IngestError> {
        JsonConnector::new(text.to_string()).load()
    }

    #[test]
    fn test_array_of_objects_unions_keys_in_order() {
        let ds = load(r#"[{"b": 1, "a": "x"}, {"a": "y", "c": true}]"#).unwrap();
        assert_eq!(ds.headers(), &["b".to_string(), "a".to_string(), "c".to_string()]);
        assert_eq!(ds.rows()[0], vec![Value::Number(1.0), Value::from("x"), Value::Null]);
        assert_eq!(ds.rows()[1], vec![Value::Null, Value::from("y"), Value::Bool(true)]);
    }

    #[test]
    fn test_single_object_is_one_row() {
        let ds = load(r#"{"id": 7, "tags": ["a", "b"]}"#).unwrap();
        assert_eq!(ds.row_count(), 1);
        assert_eq!(ds.rows()[0][1], Value::from(r#"["a","b"]"#));
    }

    #[test]
    fn test_table_object_and_nested_arrays() {
        let table = load(r#"{"headers": ["x"], "data": [[1], [2]]}"#).unwrap();
        assert_eq!(table.row_count(), 2);

        let nested = load(r#"[["x", "y"], [1, 2], [3, 4]]"#).unwrap();
        assert_eq!(nested.headers(), &["x".to_string(), "y".to_string()]);
        assert_eq!(nested.rows()[1][1], Value::Number(4.0));
    }

    #[test]
    fn test_rejects_scalars_and_empty_arrays() {
        assert!(load("42").is_err());
        assert!(load("[]").is_err());
        assert!(load("[1, 2]").is_err());
    }
}
