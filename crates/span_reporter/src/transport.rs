use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Content type of a newline-delimited bulk body.
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";

/// Error types for bulk requests
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or was reset
    #[error("connection error: {0}")]
    Connect(String),
    /// The request did not complete within the export timeout
    #[error("bulk request timed out")]
    Timeout,
    /// The destination rejected the whole request
    #[error("destination answered with status {status}")]
    Status { status: u16 },
    /// The response body could not be read
    #[error("failed to read response body: {0}")]
    Body(String),
    /// The response body is not a bulk response
    #[error("malformed bulk response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One bulk request: a single network operation carrying a whole batch.
#[derive(Debug, Clone)]
pub struct BulkRequest {
    pub method: Method,
    pub url: String,
    pub content_type: &'static str,
    pub body: Bytes,
}

/// Outcome of a bulk request the destination accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Items the destination acknowledged (0 if it didn't list them).
    pub items: usize,
    /// Items the destination reported as failed.
    pub failed_items: usize,
}

/// Trait for shipping bulk bodies to a destination.
///
/// Uses `impl Future` in the trait; see [`BulkTransportBoxed`] for dynamic
/// dispatch.
pub trait BulkTransport: Send + Sync {
    /// Performs exactly one request. Implementations must not retry.
    fn send(
        &self,
        request: BulkRequest,
    ) -> impl Future<Output = Result<BulkResponse, TransportError>> + Send;

    /// Returns the transport name for debugging.
    fn name(&self) -> &str;
}

/// Object-safe version of [`BulkTransport`].
pub trait BulkTransportBoxed: Send + Sync {
    fn send_boxed(
        &self,
        request: BulkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BulkResponse, TransportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

/// Blanket implementation: any BulkTransport can be used as BulkTransportBoxed
impl<T: BulkTransport> BulkTransportBoxed for T {
    fn send_boxed(
        &self,
        request: BulkRequest,
    ) -> Pin<Box<dyn Future<Output = Result<BulkResponse, TransportError>> + Send + '_>> {
        Box::pin(self.send(request))
    }

    fn name(&self) -> &str {
        BulkTransport::name(self)
    }
}

// =============================================================================
// BULK RESPONSE PARSING
// =============================================================================

#[derive(Deserialize)]
struct BulkResponseBody {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, BulkItemResult>>,
}

#[derive(Deserialize)]
struct BulkItemResult {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl BulkItemResult {
    fn failed(&self) -> bool {
        self.error.is_some() || self.status >= 300
    }
}

/// Counts per-item failures in a bulk response body.
///
/// Each entry of `items` is keyed by the action (`index`, `create`, ...);
/// an item failed when it carries an `error` or a non-2xx `status`.
pub fn parse_bulk_response(body: &[u8]) -> Result<BulkResponse, serde_json::Error> {
    let parsed: BulkResponseBody = serde_json::from_slice(body)?;
    let items = parsed.items.len();
    if !parsed.errors {
        return Ok(BulkResponse {
            items,
            failed_items: 0,
        });
    }

    let failed_items = parsed
        .items
        .iter()
        .flat_map(HashMap::values)
        .filter(|result| result.failed())
        .count();
    Ok(BulkResponse {
        items,
        failed_items,
    })
}

// =============================================================================
// HTTP TRANSPORT
// =============================================================================

/// Bulk transport over HTTP using `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpBulkTransport {
    client: reqwest::Client,
}

impl HttpBulkTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client (proxies, TLS roots, auth headers).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl BulkTransport for HttpBulkTransport {
    async fn send(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        let response = self
            .client
            .request(request.method, &request.url)
            .header(CONTENT_TYPE, request.content_type)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        Ok(parse_bulk_response(&body)?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Transport that records every request and answers with a scripted outcome.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingTransport {
    requests: parking_lot::Mutex<Vec<BulkRequest>>,
    failed_items: std::sync::atomic::AtomicUsize,
    fail_requests: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn report_failed_items(&self, n: usize) {
        self.failed_items
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn fail_requests(&self, fail: bool) {
        self.fail_requests
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> Vec<BulkRequest> {
        self.requests.lock().clone()
    }

    /// Number of records in each request body, in send order.
    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.requests
            .lock()
            .iter()
            .map(|r| r.body.iter().filter(|b| **b == b'\n').count() / 2)
            .collect()
    }
}

#[cfg(test)]
impl BulkTransport for RecordingTransport {
    async fn send(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        use std::sync::atomic::Ordering;

        let items = request.body.iter().filter(|b| **b == b'\n').count() / 2;
        self.requests.lock().push(request);
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        Ok(BulkResponse {
            items,
            failed_items: self.failed_items.load(Ordering::SeqCst),
        })
    }

    fn name(&self) -> &str {
        "recording"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_successful_bulk_response() {
        let body = br#"{"took":3,"errors":false,"items":[
            {"index":{"_index":"spans-2026.10.19","status":201}},
            {"index":{"_index":"spans-2026.10.19","status":201}}
        ]}"#;
        let response = parse_bulk_response(body).unwrap();
        assert_eq!(
            response,
            BulkResponse {
                items: 2,
                failed_items: 0
            }
        );
    }

    #[test]
    fn test_parse_counts_failed_items() {
        let body = br#"{"took":3,"errors":true,"items":[
            {"index":{"status":201}},
            {"index":{"status":400,"error":{"type":"mapper_parsing_exception"}}},
            {"index":{"status":201}},
            {"create":{"status":429,"error":{"type":"es_rejected_execution_exception"}}}
        ]}"#;
        let response = parse_bulk_response(body).unwrap();
        assert_eq!(response.items, 4);
        assert_eq!(response.failed_items, 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_bulk_response(b"<html>bad gateway</html>").is_err());
    }

    #[tokio::test]
    async fn test_boxed_transport_dispatch() {
        let transport: Box<dyn BulkTransportBoxed> = Box::new(RecordingTransport::new());
        let response = transport
            .send_boxed(BulkRequest {
                method: Method::POST,
                url: "http://localhost:9200/spans/_bulk".into(),
                content_type: CONTENT_TYPE_NDJSON,
                body: Bytes::from_static(b"{\"index\":{}}\n{}\n"),
            })
            .await
            .unwrap();
        assert_eq!(response.items, 1);
        assert_eq!(transport.name(), "recording");
    }

    #[tokio::test]
    async fn test_http_transport_connection_refused() {
        let transport = HttpBulkTransport::new();
        let result = transport
            .send(BulkRequest {
                method: Method::POST,
                // port 9 (discard) is closed on test machines
                url: "http://127.0.0.1:9/spans/_bulk".into(),
                content_type: CONTENT_TYPE_NDJSON,
                body: Bytes::new(),
            })
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
