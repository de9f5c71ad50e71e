//! Minimal HTTP/1.1 handling for the `server` binary.
//!
//! Routes:
//! - `GET /health`
//! - `POST /api/transform` with `{headers, data|rows, instruction}` or `{csv, instruction}`

use crate::dataset::{Dataset, Value};
use crate::error::PipelineError;
use crate::ingestion::{CsvConnector, DatasetSource, DelimitedMode};
use crate::llm::PlanModel;
use crate::pipeline::{TransformPipeline, TransformResponse};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Requests larger than this are cut off while reading.
pub const MAX_REQUEST_BYTES: usize = 10_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn from_transform(response: &TransformResponse) -> Self {
        let body = serde_json::to_string(response)
            .unwrap_or_else(|_| r#"{"status":"error","error":{"kind":"invalid-input","detail":"failed to serialize response"}}"#.to_string());
        Self::json(response.http_status(), body)
    }

    pub fn to_wire(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            self.status,
            status_text(self.status),
            self.body.len(),
            self.body
        )
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        499 => "Client Closed Request",
        502 => "Bad Gateway",
        _ => "Internal Server Error",
    }
}

pub fn extract_content_length(request: &str) -> Option<usize> {
    request
        .lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("content-length") {
                value.trim().parse().ok()
            } else {
                None
            }
        })
}

/// Whether `buffer` already holds the headers and the announced body.
pub fn request_complete(buffer: &[u8]) -> bool {
    let Some(headers_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        return false;
    };
    let head = String::from_utf8_lossy(&buffer[..headers_end]);
    match extract_content_length(&head) {
        Some(len) => buffer.len() >= headers_end + 4 + len,
        None => true,
    }
}

fn request_body(request: &str) -> &str {
    request
        .find("\r\n\r\n")
        .map(|idx| &request[idx + 4..])
        .unwrap_or("")
        .trim()
}

#[derive(Debug, Deserialize)]
struct TransformRequest {
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    headers: Option<Vec<String>>,
    #[serde(default, alias = "rows")]
    data: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    csv: Option<String>,
    #[serde(default)]
    naive_csv: bool,
}

impl TransformRequest {
    fn dataset(&self) -> Result<Dataset, PipelineError> {
        if let Some(headers) = &self.headers {
            let rows = self.data.clone().unwrap_or_default();
            return Dataset::new(headers.clone(), rows).map_err(|e| PipelineError::InvalidInput(e.to_string()));
        }
        if let Some(csv_text) = &self.csv {
            let mode = if self.naive_csv {
                DelimitedMode::Naive
            } else {
                DelimitedMode::Quoted
            };
            return CsvConnector::new(csv_text.clone())
                .with_mode(mode)
                .load()
                .map_err(|e| PipelineError::InvalidInput(e.to_string()));
        }
        Err(PipelineError::InvalidInput(
            "request needs either headers and data, or csv".to_string(),
        ))
    }
}

pub async fn handle_request<M: PlanModel>(
    request: &str,
    pipeline: &TransformPipeline<M>,
    cancel: CancellationToken,
) -> HttpResponse {
    let mut request_line = request.lines().next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(raw_path)) = (request_line.next(), request_line.next()) else {
        return HttpResponse::json(400, r#"{"error":"Malformed request line"}"#);
    };

    let path = raw_path.split('?').next().unwrap_or_default().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    info!("Request: {} {}", method, path);

    match (method, path) {
        ("GET", "/health") | ("GET", "/api/health") => {
            HttpResponse::json(200, r#"{"status":"ok","service":"dataset-transform"}"#)
        }
        ("POST", "/api/transform") => {
            let parsed = serde_json::from_str::<TransformRequest>(request_body(request))
                .map_err(|e| PipelineError::InvalidInput(format!("invalid request body: {}", e)))
                .and_then(|req| req.dataset().map(|ds| (req, ds)));
            match parsed {
                Ok((req, dataset)) => {
                    let response = pipeline.respond(&dataset, &req.instruction, cancel).await;
                    HttpResponse::from_transform(&response)
                }
                Err(e) => {
                    warn!("Rejected transform request: {}", e);
                    HttpResponse::from_transform(&TransformResponse::rejected(&e))
                }
            }
        }
        ("OPTIONS", _) => HttpResponse::json(200, ""),
        _ => HttpResponse::json(
            404,
            serde_json::json!({ "error": format!("Endpoint not found: {} {}", method, path) }).to_string(),
        ),
    }
}
