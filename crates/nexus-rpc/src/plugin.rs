//! Tauri plugin integration
//!
//! Mounts an [`RpcHandler`] as an asynchronous custom URI-scheme protocol, so the webview
//! reaches procedures at `nexus://localhost/api/...` with the same wire format as over HTTP.

use crate::body::Body;
use crate::config::RpcConfig;
use crate::router::Router;
use crate::server::{RpcHandler, error_response};
use http::{Request, Response, StatusCode};
use tauri::{
    Runtime,
    plugin::{Builder, TauriPlugin},
};
use tracing::{debug, info, warn};

// =============================================================================
// Configuration Constants
// =============================================================================

/// URI scheme the endpoint is served under.
pub const URI_SCHEME: &str = "nexus";

// =============================================================================
// Request Adaptation
// =============================================================================

/// Run one webview request through the handler and buffer the response.
///
/// The protocol responder takes a complete body, so streamed replies are delivered in one
/// piece once the stream ends.
async fn respond(handler: RpcHandler, request: Request<Vec<u8>>) -> Response<Vec<u8>> {
    let request = request.map(Body::from);
    let response = handler
        .handle(request, |_event, _request| async {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        })
        .await;

    let (parts, body) = response.into_parts();
    match body.collect().await {
        Ok(bytes) => Response::from_parts(parts, bytes.to_vec()),
        Err(error) => {
            warn!(error = %error, "Failed to buffer protocol response");
            let (parts, body) = error_response(error).into_parts();
            let bytes = body.collect().await.unwrap_or_default();
            Response::from_parts(parts, bytes.to_vec())
        }
    }
}

// =============================================================================
// Plugin Initialization
// =============================================================================

/// Initialize the RPC plugin with a router
///
/// # Example
/// ```rust,ignore
/// tauri::Builder::default()
///     .plugin(nexus_rpc::plugin::init(create_router()))
///     .run(tauri::generate_context!())
/// ```
pub fn init<R: Runtime>(router: Router) -> TauriPlugin<R> {
    init_with_config(router, RpcConfig::default())
}

/// Initialize the RPC plugin with a router and custom configuration
///
/// # Panics
///
/// Panics if the configuration is invalid (e.g., max_input_size is 0).
/// Use `RpcConfig::validate()` to check configuration before passing it.
///
/// # Example
/// ```rust,ignore
/// let config = RpcConfig::new()
///     .with_max_input_size(512 * 1024)
///     .with_debug_logging(true);
///
/// tauri::Builder::default()
///     .plugin(nexus_rpc::plugin::init_with_config(create_router(), config))
///     .run(tauri::generate_context!())
/// ```
pub fn init_with_config<R: Runtime>(router: Router, config: RpcConfig) -> TauriPlugin<R> {
    let handler = match RpcHandler::new(router, config) {
        Ok(handler) => handler,
        Err(e) => panic!("Invalid RPC configuration: {}", e),
    };

    info!(
        scheme = URI_SCHEME,
        endpoint = ?handler.config().endpoint,
        procedure_count = handler.router().len(),
        "RPC plugin initializing"
    );

    Builder::new("nexus-rpc")
        .register_asynchronous_uri_scheme_protocol(URI_SCHEME, move |_ctx, request, responder| {
            let handler = handler.clone();
            debug!(uri = %request.uri(), "Protocol request");
            tauri::async_runtime::spawn(async move {
                responder.respond(respond(handler, request).await);
            });
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procedure::procedure;

    #[tokio::test]
    async fn test_buffers_handler_response() {
        let router = Router::new().procedure("ping", procedure().handle(|_args| async { Ok("pong") }));
        let handler = RpcHandler::new(router, RpcConfig::default()).unwrap();
        let request = Request::post("nexus://localhost/api/ping")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(b"null".to_vec())
            .unwrap();

        let response = respond(handler, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body(), br#"{"result":"pong"}"#);
    }

    #[tokio::test]
    async fn test_outside_endpoint_is_not_found() {
        let handler = RpcHandler::new(Router::new(), RpcConfig::default()).unwrap();
        let request = Request::get("nexus://localhost/index.html").body(Vec::new()).unwrap();
        let response = respond(handler, request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
