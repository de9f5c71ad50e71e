//! Ingestion adapters - turn delimited text and JSON payloads into [`Dataset`]s.
//!
//! These sit in front of the pipeline: the core only ever sees a validated dataset.

pub mod csv_connector;
pub mod json_connector;
pub mod remote;

pub use csv_connector::{CsvConnector, DelimitedMode};
pub use json_connector::JsonConnector;
pub use remote::fetch_dataset;

use crate::dataset::Dataset;
use crate::error::IngestError;
use std::path::Path;
use tracing::info;

/// A source that can produce one dataset.
pub trait DatasetSource {
    fn source_type(&self) -> &str;

    fn load(&self) -> Result<Dataset, IngestError>;
}

/// Loads a local file, choosing the connector from the extension. Anything that is not
/// `.json` is read as delimited text.
pub fn load_path(path: &Path, mode: DelimitedMode) -> Result<Dataset, IngestError> {
    let text = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let dataset = if is_json {
        JsonConnector::new(text).load()?
    } else {
        CsvConnector::new(text).with_mode(mode).load()?
    };
    info!(
        "Loaded {} rows x {} columns from {}",
        dataset.row_count(),
        dataset.column_count(),
        path.display()
    );
    Ok(dataset)
}

/// Parses a payload whose format is unknown: JSON if it starts like JSON, otherwise CSV.
pub fn parse_payload(text: &str, mode: DelimitedMode) -> Result<Dataset, IngestError> {
    if looks_like_json(text) {
        JsonConnector::new(text.to_string()).load()
    } else {
        CsvConnector::new(text.to_string()).with_mode(mode).load()
    }
}

pub(crate) fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().chars().next(), Some('{') | Some('['))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Value;

    #[test]
    fn test_parse_payload_dispatch() {
        let csv = parse_payload("a,b\n1,2\n", DelimitedMode::Quoted).unwrap();
        assert_eq!(csv.headers(), &["a".to_string(), "b".to_string()]);

        let json = parse_payload(r#"[{"a": 1}]"#, DelimitedMode::Quoted).unwrap();
        assert_eq!(json.rows()[0][0], Value::Number(1.0));
    }

    #[test]
    fn test_load_path_reads_json_by_extension() {
        let dir = std::env::temp_dir().join(format!("dataset-transform-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("rows.json");
        std::fs::write(&path, r#"{"city": "Pune", "pop": 7}"#).unwrap();

        let ds = load_path(&path, DelimitedMode::Quoted).unwrap();
        assert_eq!(ds.row_count(), 1);
        assert_eq!(ds.headers(), &["city".to_string(), "pop".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
