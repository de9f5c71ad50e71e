//! Remote file fetch: download a CSV or JSON document and read it as a dataset.

use crate::dataset::Dataset;
use crate::error::IngestError;
use crate::ingestion::{looks_like_json, CsvConnector, DatasetSource, DelimitedMode, JsonConnector};
use tracing::{debug, info};

pub async fn fetch_dataset(
    client: &reqwest::Client,
    url: &str,
    mode: DelimitedMode,
) -> Result<Dataset, IngestError> {
    info!("Fetching dataset from {}", url);
    let response = client.get(url).send().await?.error_for_status()?;

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase())
        .unwrap_or_default();
    let body = response.text().await?;
    debug!("Fetched {} bytes ({})", body.len(), content_type);

    if is_json_payload(&content_type, &body) {
        JsonConnector::new(body).load()
    } else if content_type.is_empty() || content_type.contains("csv") || content_type.starts_with("text/") {
        CsvConnector::new(body).with_mode(mode).load()
    } else {
        Err(IngestError::UnsupportedSource(format!(
            "{} returned unsupported content type {}",
            url, content_type
        )))
    }
}

fn is_json_payload(content_type: &str, body: &str) -> bool {
    content_type.contains("json") || (!content_type.contains("csv") && looks_like_json(body))
}
