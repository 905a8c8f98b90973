//! Dispatch engine
//!
//! [`RpcHandler`] turns one HTTP request into one procedure call and shapes the reply:
//!
//! ```text
//! Decode -> Resolve -> Validate -> Build context -> Invoke -> Shape response
//! ```
//!
//! Any failure before shaping goes straight to an error response `{"error", "issues"?}` with
//! the kind's status. Cookie mutations queued during the call are written only when it
//! succeeds.
//!
//! # Example
//!
//! ```rust,ignore
//! let rpc = RpcHandler::new(router, RpcConfig::default())?;
//!
//! let response = rpc
//!     .handle(request, |_event, request| async move { static_files(request).await })
//!     .await;
//! ```

mod caller;

pub use caller::Caller;

use crate::body::Body;
use crate::codec::{WireFormat, decode_form, json, multipart};
use crate::config::{ConfigValidationError, RpcConfig};
use crate::error::{RpcError, RpcErrorCode, RpcResult};
use crate::event::{CancelOnDrop, CookieMutation, RequestEvent};
use crate::handler::Reply;
use crate::logging::{DEFAULT_SLOW_THRESHOLD_MS, loggable, short_id};
use crate::router::Router;
use crate::stream::{self, EVENT_STREAM};
use crate::value::{Blob, Value};
use bytes::Bytes;
use futures::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use http::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderValue, SET_COOKIE};
use http::{Method, Request, Response, StatusCode};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Header a matching client sets on every call.
pub const CLIENT_HEADER: &str = "x-nexus-rpc-client";

const JSON_CONTENT_TYPE: &str = "application/json";

/// How the caller wants results encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseFormat {
    /// `{"result": value}` JSON
    Plain,
    /// Multipart form in the given wire format
    Form(WireFormat),
}

/// Serves a [`Router`] over HTTP.
#[derive(Debug, Clone)]
pub struct RpcHandler {
    router: Arc<Router>,
    config: Arc<RpcConfig>,
}

impl RpcHandler {
    /// Build a handler, rejecting a configuration that fails [`RpcConfig::validate`].
    pub fn new(router: Router, config: RpcConfig) -> Result<Self, ConfigValidationError> {
        config.validate()?;
        debug!(
            procedures = router.procedures().len(),
            endpoint = ?config.endpoint,
            "RPC handler created"
        );
        Ok(Self {
            router: Arc::new(router),
            config: Arc::new(config),
        })
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// In-process caller bound to `event`.
    pub fn caller(&self, event: &RequestEvent) -> Caller {
        Caller::new(self.router.clone(), event)
    }

    /// Mount point: serve requests under the endpoint, hand everything else to `resolve`.
    ///
    /// Before either happens the in-process [`Caller`] is installed in the event's locals
    /// under the configured key, so the host's own handlers can call procedures too.
    pub async fn handle<R, Fut>(&self, request: Request<Body>, resolve: R) -> Response<Body>
    where
        R: FnOnce(RequestEvent, Request<Body>) -> Fut,
        Fut: Future<Output = Response<Body>>,
    {
        let (parts, body) = request.into_parts();
        let event = RequestEvent::from_parts(&parts);
        if let Some(key) = &self.config.locals_key {
            event.locals().insert(key.clone(), self.caller(&event));
        }
        let request = Request::from_parts(parts, body);

        match self.procedure_path(request.uri().path()) {
            Some(path) => self.dispatch(event, path, request).await,
            None => resolve(event, request).await,
        }
    }

    /// Segments after the endpoint, or `None` if the path is not under it.
    fn procedure_path(&self, path: &str) -> Option<Vec<String>> {
        let endpoint = self.config.endpoint.as_deref()?;
        let rest = path.strip_prefix(endpoint)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        let rest = rest.strip_prefix('/').unwrap_or(rest);
        if rest.is_empty() {
            return Some(Vec::new());
        }
        Some(rest.split('/').map(str::to_string).collect())
    }

    /// Run one call and build its response.
    pub async fn dispatch(
        &self,
        event: RequestEvent,
        path: Vec<String>,
        request: Request<Body>,
    ) -> Response<Body> {
        let started = Instant::now();
        let dotted = path.join(".");
        debug!(
            request_id = %short_id(event.request_id()),
            path = %dotted,
            "RPC request started"
        );

        let mut guard = CancelOnDrop::new(event.signal().clone());
        let outcome = AssertUnwindSafe(self.run(&event, &path, request))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panicked(panic)));

        let response = match outcome.and_then(|(reply, format)| shape(reply, format)) {
            Ok((response, body_stream)) => {
                let mut response = with_cookies(response, event.cookies().take_mutations());
                if let Some(body_stream) = body_stream {
                    *response.body_mut() = guarded(body_stream, guard);
                } else {
                    guard.disarm();
                }
                response
            }
            Err(e) => {
                guard.disarm();
                event.cookies().take_mutations();
                self.error_response(&event, &dotted, e)
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let status = response.status().as_u16();
        if self.config.debug_logging {
            debug!(request_id = %short_id(event.request_id()), path = %dotted, status, duration_ms, "RPC response");
        } else {
            trace!(request_id = %short_id(event.request_id()), path = %dotted, status, duration_ms, "RPC response");
        }
        if duration_ms > DEFAULT_SLOW_THRESHOLD_MS {
            warn!(path = %dotted, duration_ms, "Slow RPC call");
        }
        response
    }

    async fn run(
        &self,
        event: &RequestEvent,
        path: &[String],
        request: Request<Body>,
    ) -> RpcResult<(Reply, ResponseFormat)> {
        let (parts, body) = request.into_parts();
        if parts.method != Method::POST {
            return Err(RpcError::method_not_supported(format!(
                "Method {} is not supported, use POST",
                parts.method
            )));
        }

        let (input, format) = self.decode(event, body).await.inspect_err(|e| {
            warn!(error_code = %e.code, error = %e.message, "Failed to decode request");
        })?;
        if self.config.debug_logging {
            debug!(input = %loggable(&input), "Decoded input");
        }

        let procedure = self.router.resolve(path)?;
        trace!(kind = %procedure.kind(), "Invoking procedure");
        let reply = procedure.call(event.clone(), input).await?;
        Ok((reply, format))
    }

    async fn decode(&self, event: &RequestEvent, body: Body) -> RpcResult<(Value, ResponseFormat)> {
        let bytes = body.collect_limited(self.config.max_input_size).await?;
        let from_client = event.header(CLIENT_HEADER) == Some("true");
        let content_type = event.header(CONTENT_TYPE.as_str()).unwrap_or_default();

        if from_client && multipart::is_multipart(content_type) {
            let form = multipart::decode(content_type, bytes).await?;
            let (value, format) = decode_form(&form)?;
            trace!(?format, parts = form.len(), "Decoded form input");
            return Ok((value, ResponseFormat::Form(format)));
        }

        let value = json::parse(&bytes)?;
        let format = if from_client {
            ResponseFormat::Form(WireFormat::default())
        } else {
            ResponseFormat::Plain
        };
        Ok((value, format))
    }

    fn error_response(&self, event: &RequestEvent, path: &str, error: RpcError) -> Response<Body> {
        if error.code.is_server_error() {
            warn!(
                request_id = %short_id(event.request_id()),
                path = %path,
                error_code = %error.code,
                error = %error.message,
                "RPC call failed"
            );
        } else {
            debug!(path = %path, error_code = %error.code, error = %error.message, "RPC call rejected");
        }
        error_response(error.apply_config(&self.config.error_config))
    }
}

/// JSON error response for `error`.
pub fn error_response(error: RpcError) -> Response<Body> {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match serde_json::to_vec(&error.to_body()) {
        Ok(body) => body,
        Err(_) => format!("{{\"error\":\"{}\"}}", error.code.default_message()).into_bytes(),
    };
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    response
}

fn panicked(panic: Box<dyn Any + Send>) -> RpcError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!(panic = %message, "Procedure panicked");
    RpcError::from_code(RpcErrorCode::InternalServerError).with_cause(message)
}

type Shaped = (Response<Body>, Option<BoxStream<'static, RpcResult<Bytes>>>);

/// Build the response for a reply. A streamed body is returned separately so the caller can
/// tie it to the request's cancellation.
fn shape(reply: Reply, format: ResponseFormat) -> RpcResult<Shaped> {
    match reply {
        Reply::Response(response) => Ok((response, None)),
        Reply::Stream(chunks) => {
            let response = Response::builder()
                .header(CONTENT_TYPE, EVENT_STREAM)
                .body(Body::empty())?;
            Ok((response, Some(stream::encode(chunks))))
        }
        Reply::Value(Value::Blob(blob)) => Ok((binary(blob)?, None)),
        Reply::Value(value) => {
            let response = match format {
                ResponseFormat::Form(format) => {
                    let form = format.encode(&value)?;
                    let (content_type, body) = multipart::encode(&form);
                    Response::builder()
                        .header(CONTENT_TYPE, content_type)
                        .body(Body::from(body))?
                }
                ResponseFormat::Plain => {
                    let mut envelope = serde_json::Map::new();
                    if !value.is_undefined() {
                        envelope.insert("result".to_string(), json::to_json(&value)?);
                    }
                    Response::builder()
                        .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
                        .body(Body::from(serde_json::to_vec(&envelope)?))?
                }
            };
            Ok((response, None))
        }
    }
}

fn binary(blob: Blob) -> RpcResult<Response<Body>> {
    let file_name = blob.name.as_deref().unwrap_or("blob").replace('"', "%22");
    Ok(Response::builder()
        .header(CONTENT_TYPE, blob.media_type.as_str())
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(Body::from(blob.data))?)
}

fn with_cookies(mut response: Response<Body>, mutations: Vec<CookieMutation>) -> Response<Body> {
    for mutation in mutations {
        match HeaderValue::from_str(&mutation.to_header_value()) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!(cookie = %mutation.name, error = %e, "Dropping invalid cookie"),
        }
    }
    response
}

/// Body that cancels the request if dropped before it is fully sent.
fn guarded(mut body: BoxStream<'static, RpcResult<Bytes>>, mut guard: CancelOnDrop) -> Body {
    Body::from_stream(async_stream::stream! {
        while let Some(item) = body.next().await {
            let failed = item.is_err();
            yield item;
            if failed {
                break;
            }
        }
        guard.disarm();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandleArgs;
    use crate::procedure::procedure;

    fn handler() -> RpcHandler {
        let router = Router::new()
            .procedure("ping", procedure().handle(|_args| async { Ok("pong") }))
            .procedure(
                "boom",
                procedure().handle(|_args: HandleArgs<()>| async {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(())
                }),
            );
        RpcHandler::new(router, RpcConfig::default()).unwrap()
    }

    fn post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::from(body))
            .unwrap()
    }

    async fn passthrough(_event: RequestEvent, _request: Request<Body>) -> Response<Body> {
        Response::new(Body::from("app"))
    }

    async fn text(response: Response<Body>) -> String {
        let bytes = response.into_body().collect().await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_procedure_path() {
        let rpc = handler();
        assert_eq!(
            rpc.procedure_path("/api/users/get"),
            Some(vec!["users".to_string(), "get".to_string()])
        );
        assert_eq!(rpc.procedure_path("/api"), Some(vec![]));
        assert_eq!(rpc.procedure_path("/apiary"), None);
        assert_eq!(rpc.procedure_path("/other"), None);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = RpcHandler::new(Router::new(), RpcConfig::new().with_max_input_size(0)).unwrap_err();
        assert_eq!(err, ConfigValidationError::InvalidMaxInputSize);

        let err = RpcHandler::new(Router::new(), RpcConfig::new().with_endpoint("api/")).unwrap_err();
        assert_eq!(err, ConfigValidationError::InvalidEndpoint("api/".to_string()));
    }

    #[tokio::test]
    async fn test_plain_call() {
        let response = handler().handle(post("/api/ping", ""), passthrough).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, r#"{"result":"pong"}"#);
    }

    #[tokio::test]
    async fn test_outside_endpoint_goes_to_resolve() {
        let response = handler().handle(post("/index.html", ""), passthrough).await;
        assert_eq!(text(response).await, "app");
    }

    #[tokio::test]
    async fn test_get_is_rejected() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/ping")
            .body(Body::empty())
            .unwrap();
        let response = handler().handle(request, passthrough).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let response = handler().handle(post("/api/boom", ""), passthrough).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let response = handler().handle(post("/api/nope", ""), passthrough).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(text(response).await.contains("not found"));
    }
}
