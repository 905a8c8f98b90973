//! HTTP client for a nexus-rpc endpoint
//!
//! [`Client`] is the HTTP backend of a [`Proxy`]: it POSTs `endpoint/a/b/c` with the input
//! encoded as a multipart form in the configured [`WireFormat`], sets the client marker header,
//! and decodes the reply. Failures come back as a normalized [`ClientError`].
//!
//! ```rust,ignore
//! let client = Client::new(
//!     ClientConfig::new()
//!         .with_base_url("http://localhost:8080")
//!         .on_error(|e| tracing::warn!(status = e.status, error = %e.error, "call failed")),
//!     ReqwestTransport::new(),
//! );
//! let api = client.proxy();
//! let user: User = api.path("users.get").call(&GetUser { id: 1 }).await?;
//! ```

mod transport;

#[cfg(feature = "http-client")]
pub use transport::ReqwestTransport;
pub use transport::{LoopbackTransport, Transport};

use crate::body::Body;
use crate::codec::{CodecError, WireFormat, decode_form, json, multipart};
use crate::error::{ErrorBody, RpcError, RpcErrorCode};
use crate::proxy::{ChunkResults, Invoke, InvokeFuture, Proxy};
use crate::server::{CLIENT_HEADER, RpcHandler};
use crate::stream::{Chunk, ChunkDecoder, EVENT_STREAM};
use crate::validation::Issue;
use crate::value::{Blob, OCTET_STREAM, Value};
use futures::stream::StreamExt;
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

// =============================================================================
// Client Error
// =============================================================================

/// Error seen by a caller: `{error, status, statusText, issues?}`.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{status} {status_text}: {error}")]
#[serde(rename_all = "camelCase")]
pub struct ClientError {
    pub error: String,
    pub status: u16,
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<Issue>,
}

impl ClientError {
    pub fn new(status: u16, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status,
            status_text: status_text(status),
            issues: Vec::new(),
        }
    }

    /// Normalize a non-success response body. Bodies that are not an error document keep the
    /// status and its reason phrase.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let status = status.as_u16();
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(body) => Self {
                error: body.error,
                status,
                status_text: status_text(status),
                issues: body.issues,
            },
            Err(_) => Self::new(status, status_text(status)),
        }
    }

    /// The input could not be encoded.
    pub fn encode(error: CodecError) -> Self {
        RpcError::from(error).into()
    }

    /// The reply could not be decoded into the expected shape.
    pub fn decode(error: CodecError) -> Self {
        RpcError::bad_request(format!("Failed to decode response: {}", error)).into()
    }

    /// Error kind for the status, if it is one of the catalog's.
    pub fn code(&self) -> Option<RpcErrorCode> {
        RpcErrorCode::from_status(self.status)
    }
}

impl From<RpcError> for ClientError {
    fn from(error: RpcError) -> Self {
        Self {
            status: error.status(),
            status_text: error.code.default_message().to_string(),
            error: error.message,
            issues: error.issues,
        }
    }
}

fn status_text(status: u16) -> String {
    match RpcErrorCode::from_status(status) {
        Some(code) => code.default_message().to_string(),
        None => StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown")
            .to_string(),
    }
}

// =============================================================================
// Configuration
// =============================================================================

type HeaderFn = Arc<dyn Fn(&str, &Value) -> HeaderMap + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ClientError) + Send + Sync>;

/// Extra headers sent with every call.
#[derive(Clone, Default)]
pub enum Headers {
    #[default]
    None,
    Static(HeaderMap),
    /// Computed per call from the dotted path and the input
    Computed(HeaderFn),
}

impl Headers {
    fn resolve(&self, path: &str, input: &Value) -> HeaderMap {
        match self {
            Headers::None => HeaderMap::new(),
            Headers::Static(headers) => headers.clone(),
            Headers::Computed(compute) => compute(path, input),
        }
    }
}

impl fmt::Debug for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Headers::None => f.write_str("None"),
            Headers::Static(headers) => f.debug_tuple("Static").field(headers).finish(),
            Headers::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Scheme and authority, e.g. `http://localhost:8080`. Empty for in-process transports.
    pub base_url: String,
    /// Endpoint prefix (default: `/api`)
    pub endpoint: String,
    /// Input encoding (default: structured)
    pub wire_format: WireFormat,
    pub headers: Headers,
    on_error: Option<ErrorHook>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            endpoint: crate::config::DEFAULT_ENDPOINT.to_string(),
            wire_format: WireFormat::default(),
            headers: Headers::None,
            on_error: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    /// Send the same headers with every call.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Headers::Static(headers);
        self
    }

    /// Compute headers per call from the dotted path and the input.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn with_header_fn<F>(mut self, compute: F) -> Self
    where
        F: Fn(&str, &Value) -> HeaderMap + Send + Sync + 'static,
    {
        self.headers = Headers::Computed(Arc::new(compute));
        self
    }

    /// Observe every failed call before it is returned.
    #[must_use = "This method returns a new ClientConfig and does not modify self"]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("wire_format", &self.wire_format)
            .field("headers", &self.headers)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP backend for [`Proxy`].
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(config: ClientConfig, transport: impl Transport + 'static) -> Self {
        Self {
            config: Arc::new(config),
            transport: Arc::new(transport),
        }
    }

    /// Client that drives `handler` in-process, through the full HTTP path.
    pub fn loopback(handler: RpcHandler) -> Self {
        let endpoint = handler
            .config()
            .endpoint
            .clone()
            .unwrap_or_else(|| crate::config::DEFAULT_ENDPOINT.to_string());
        Self::new(
            ClientConfig::new().with_endpoint(endpoint),
            LoopbackTransport::new(handler),
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Proxy at the root of the remote router.
    pub fn proxy(&self) -> Proxy {
        Proxy::new(Arc::new(self.clone()))
    }

    /// Call `path` and get `(result, error)` with exactly one of them set.
    pub async fn call_pair<I, O>(&self, path: &str, input: &I) -> (Option<O>, Option<ClientError>)
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        match self.proxy().path(path).call(input).await {
            Ok(output) => (Some(output), None),
            Err(e) => (None, Some(e)),
        }
    }

    fn url(&self, path: &[String]) -> String {
        format!(
            "{}{}/{}",
            self.config.base_url,
            self.config.endpoint,
            path.join("/")
        )
    }

    fn fail(&self, error: ClientError) -> ClientError {
        debug!(status = error.status, error = %error.error, "RPC call failed");
        if let Some(hook) = &self.config.on_error {
            hook(&error);
        }
        error
    }

    async fn send(&self, path: &[String], input: Value) -> Result<Response<Body>, ClientError> {
        let dotted = path.join(".");
        let form = self
            .config
            .wire_format
            .encode(&input)
            .map_err(|e| self.fail(ClientError::encode(e)))?;
        let (content_type, body) = multipart::encode(&form);

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.url(path))
            .header(CONTENT_TYPE, content_type)
            .header(CLIENT_HEADER, "true")
            .body(Body::from(body))
            .map_err(|e| self.fail(RpcError::from(e).into()))?;
        for (name, value) in self.config.headers.resolve(&dotted, &input).iter() {
            request.headers_mut().append(name.clone(), value.clone());
        }

        trace!(path = %dotted, format = ?self.config.wire_format, "Sending RPC request");
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|e| self.fail(e))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.into_body().collect().await.unwrap_or_default();
        Err(self.fail(ClientError::from_response(status, &body)))
    }

    async fn read_value(&self, response: Response<Body>) -> Result<Value, ClientError> {
        let content_type = header_text(response.headers(), &CONTENT_TYPE).unwrap_or_default();
        if content_type.starts_with(EVENT_STREAM) {
            let mut chunks = decode_stream(response);
            let mut all = Vec::new();
            while let Some(chunk) = chunks.next().await {
                all.push(chunk.map_err(|e| self.fail(e))?.chunk);
            }
            return Ok(Value::Array(all));
        }

        let disposition = header_text(response.headers(), &CONTENT_DISPOSITION);
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| self.fail(e.into()))?;

        if multipart::is_multipart(&content_type) {
            let form = multipart::decode(&content_type, body)
                .await
                .map_err(|e| self.fail(ClientError::decode(e)))?;
            let (value, _) = decode_form(&form).map_err(|e| self.fail(ClientError::decode(e)))?;
            return Ok(value);
        }
        if content_type.starts_with("application/json") {
            let envelope = json::parse(&body).map_err(|e| self.fail(ClientError::decode(e)))?;
            return Ok(envelope.get("result").cloned().unwrap_or(Value::Undefined));
        }

        let media_type = if content_type.is_empty() {
            OCTET_STREAM.to_string()
        } else {
            content_type
        };
        Ok(Value::Blob(match disposition.as_deref().and_then(file_name) {
            Some(name) => Blob::file(name, body, media_type),
            None => Blob::new(body, media_type),
        }))
    }
}

fn header_text(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value: &HeaderValue| value.to_str().ok())
        .map(str::to_string)
}

/// `filename="..."` of a `Content-Disposition` header.
fn file_name(disposition: &str) -> Option<String> {
    disposition.split(';').find_map(|param| {
        let value = param.trim().strip_prefix("filename=")?;
        Some(value.trim_matches('"').replace("%22", "\""))
    })
}

/// Decode a streamed response body into chunks.
fn decode_stream(response: Response<Body>) -> ChunkResults {
    let mut body = response.into_body().into_stream();
    async_stream::stream! {
        let mut decoder = ChunkDecoder::new();
        while let Some(bytes) = body.next().await {
            let bytes = match bytes {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(ClientError::from(e));
                    return;
                }
            };
            match decoder.push(&bytes) {
                Ok(chunks) => {
                    for chunk in chunks {
                        yield Ok(chunk);
                    }
                }
                Err(e) => {
                    yield Err(ClientError::decode(e));
                    return;
                }
            }
        }
        match decoder.finish() {
            Ok(Some(chunk)) => yield Ok(chunk),
            Ok(None) => {}
            Err(e) => yield Err(ClientError::decode(e)),
        }
    }
    .boxed()
}

impl Invoke for Client {
    fn invoke<'a>(&'a self, path: &'a [String], input: Value) -> InvokeFuture<'a, Value> {
        Box::pin(async move {
            let response = self.send(path, input).await?;
            self.read_value(response).await
        })
    }

    fn invoke_stream<'a>(
        &'a self,
        path: &'a [String],
        input: Value,
    ) -> InvokeFuture<'a, ChunkResults> {
        Box::pin(async move {
            let response = self.send(path, input).await?;
            let streamed = header_text(response.headers(), &CONTENT_TYPE)
                .is_some_and(|ct| ct.starts_with(EVENT_STREAM));
            if streamed {
                return Ok(decode_stream(response));
            }
            let value = self.read_value(response).await?;
            let single = futures::stream::iter([Ok(Chunk {
                chunk: value,
                first: true,
            })]);
            Ok(single.boxed())
        })
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_reads_error_body() {
        let body = br#"{"error":"name: too short","issues":[{"message":"too short","path":["name"]}]}"#;
        let error = ClientError::from_response(StatusCode::BAD_REQUEST, body);
        assert_eq!(error.status, 400);
        assert_eq!(error.status_text, "Bad Request");
        assert_eq!(error.error, "name: too short");
        assert_eq!(error.issues.len(), 1);
        assert_eq!(error.code(), Some(RpcErrorCode::BadRequest));
    }

    #[test]
    fn test_from_response_without_body() {
        let error = ClientError::from_response(StatusCode::BAD_GATEWAY, b"<html>");
        assert_eq!(error.error, "Bad Gateway");
        assert_eq!(error.status_text, "Bad Gateway");
    }

    #[test]
    fn test_serializes_status_text_camel_case() {
        let json = serde_json::to_value(ClientError::new(404, "missing")).unwrap();
        assert_eq!(json["statusText"], "Not Found");
        assert!(json.get("issues").is_none());
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            file_name("attachment; filename=\"report.pdf\"").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(file_name("inline"), None);
    }

    #[test]
    fn test_url() {
        let client = Client::new(
            ClientConfig::new().with_base_url("http://localhost:8080/"),
            LoopbackTransport::new(RpcHandler::new(
                crate::router::Router::new(),
                crate::config::RpcConfig::default(),
            )
            .unwrap()),
        );
        assert_eq!(
            client.url(&["users".to_string(), "get".to_string()]),
            "http://localhost:8080/api/users/get"
        );
    }
}
