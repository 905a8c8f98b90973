//! Transports that carry a client request to a server

use super::ClientError;
use crate::body::Body;
use crate::server::RpcHandler;
use futures::future::BoxFuture;
use http::{Request, Response, StatusCode};

/// Sends one HTTP request and returns the response, body possibly still streaming.
pub trait Transport: Send + Sync {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, ClientError>>;
}

/// Drives an [`RpcHandler`] in-process, without a socket.
///
/// Requests outside the handler's endpoint get `404 Not Found`.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    handler: RpcHandler,
}

impl LoopbackTransport {
    pub fn new(handler: RpcHandler) -> Self {
        Self { handler }
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, request: Request<Body>) -> BoxFuture<'_, Result<Response<Body>, ClientError>> {
        Box::pin(async move {
            let response = self
                .handler
                .handle(request, |_event, _request| async {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    response
                })
                .await;
            Ok(response)
        })
    }
}

#[cfg(feature = "http-client")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "http-client")]
mod reqwest_transport {
    use super::{ClientError, Transport};
    use crate::body::Body;
    use crate::error::{RpcError, RpcErrorCode};
    use futures::future::BoxFuture;
    use futures::stream::StreamExt;
    use http::{Request, Response};
    use tracing::debug;

    /// Sends requests over the network with `reqwest`.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    fn unreachable_server(error: reqwest::Error) -> RpcError {
        debug!(error = %error, "HTTP transport failed");
        RpcError::new(RpcErrorCode::BadGateway, error.to_string())
    }

    impl Transport for ReqwestTransport {
        fn send(
            &self,
            request: Request<Body>,
        ) -> BoxFuture<'_, Result<Response<Body>, ClientError>> {
            Box::pin(async move {
                let (parts, body) = request.into_parts();
                let body = body.collect().await?;
                let response = self
                    .client
                    .request(parts.method, parts.uri.to_string())
                    .headers(parts.headers)
                    .body(body)
                    .send()
                    .await
                    .map_err(unreachable_server)?;

                let mut builder = Response::builder().status(response.status());
                if let Some(headers) = builder.headers_mut() {
                    headers.extend(response.headers().clone());
                }
                let stream = response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(unreachable_server));
                Ok(builder
                    .body(Body::from_stream(stream))
                    .map_err(RpcError::from)?)
            })
        }
    }
}
