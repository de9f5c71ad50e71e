//! HTTP server for dataset transformations.
//! Plain tokio TCP handling; see `dataset_transform::http` for the routes.

use anyhow::{Context, Result};
use dataset_transform::http::{handle_request, request_complete, HttpResponse, MAX_REQUEST_BYTES};
use dataset_transform::{LlmClient, LlmConfig, PipelineConfig, TransformPipeline};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let llm_config = LlmConfig::from_env();
    if llm_config.is_offline() {
        warn!("OpenAI API key not found - model calls run in offline mode");
    } else {
        info!("Using model {} at {}", llm_config.model, llm_config.base_url);
    }
    let client = LlmClient::new(llm_config).context("Failed to build HTTP client")?;
    let pipeline = Arc::new(TransformPipeline::new(client, PipelineConfig::from_env()));

    let bind = std::env::var("TRANSFORM_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("Server listening on {}", bind);

    let shutdown = CancellationToken::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down, cancelling in-flight requests");
                shutdown.cancel();
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!("New connection from: {}", addr);
                tokio::spawn(handle_connection(stream, Arc::clone(&pipeline), shutdown.child_token()));
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    pipeline: Arc<TransformPipeline<LlmClient>>,
    cancel: CancellationToken,
) {
    let mut buffer = Vec::new();
    let mut chunk = [0; 8192];

    let read_result = timeout(Duration::from_secs(5), async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if request_complete(&buffer) || buffer.len() > MAX_REQUEST_BYTES {
                break;
            }
        }
        Ok::<_, std::io::Error>(())
    })
    .await;

    match read_result {
        Err(_) => {
            warn!("Request read timeout");
            return;
        }
        Ok(Err(e)) => {
            error!("Failed to read from stream: {}", e);
            return;
        }
        Ok(Ok(())) => {}
    }
    if buffer.is_empty() {
        return;
    }

    let response = match String::from_utf8(buffer) {
        Ok(request) => handle_request(&request, pipeline.as_ref(), cancel).await,
        Err(e) => HttpResponse::json(
            400,
            serde_json::json!({ "error": format!("Request is not UTF-8: {}", e) }).to_string(),
        ),
    };

    if let Err(e) = stream.write_all(response.to_wire().as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}
