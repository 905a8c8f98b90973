//! Handler arguments, replies and type erasure
//!
//! A handler is any `Fn(HandleArgs<I>) -> impl Future<Output = RpcResult<O>>`. This module
//! holds the arguments it receives, what it may return, and the type-erased form the router
//! stores. Erasure happens once, when a procedure is built; a call then runs validation, the
//! middleware fold and the handler in that order.

use crate::body::Body;
use crate::context::Context;
use crate::error::RpcResult;
use crate::event::RequestEvent;
use crate::middleware::{MiddlewareFn, run_middlewares};
use crate::stream::ChunkStream;
use crate::validation::{Schema, Validation};
use crate::value::{Value, to_value};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What a handler receives.
#[derive(Debug)]
pub struct HandleArgs<I> {
    /// The inbound request and its capabilities
    pub event: RequestEvent,
    /// Input as produced by the procedure's schema, `()` without one
    pub input: I,
    /// Context folded from the procedure's middlewares
    pub ctx: Context,
}

/// Result of one procedure invocation, before it is shaped into a response.
pub enum Reply {
    /// A single value; a top-level blob is sent as binary
    Value(Value),
    /// An async sequence sent with the streaming protocol
    Stream(ChunkStream),
    /// A complete response, passed through untouched
    Response(http::Response<Body>),
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Value(_) => "value",
            Reply::Stream(_) => "stream",
            Reply::Response(_) => "response",
        }
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(value) => f.debug_tuple("Reply::Value").field(value).finish(),
            Reply::Stream(stream) => f.debug_tuple("Reply::Stream").field(stream).finish(),
            Reply::Response(response) => f
                .debug_tuple("Reply::Response")
                .field(&response.status())
                .finish(),
        }
    }
}

/// Future of an erased procedure call.
pub type ReplyFuture = Pin<Box<dyn Future<Output = RpcResult<Reply>> + Send>>;

/// Boxed handler for type erasure
pub(crate) type BoxedHandler = Arc<dyn Fn(RequestEvent, Value) -> ReplyFuture + Send + Sync>;

/// Turns a handler's output into a [`Reply`].
pub(crate) type Finish<O> = fn(O) -> RpcResult<Reply>;

pub(crate) fn finish_value<O: Serialize>(output: O) -> RpcResult<Reply> {
    let value = to_value(&output).inspect_err(|e| {
        warn!(error = %e, "Handler output serialization failed");
    })?;
    Ok(Reply::Value(value))
}

pub(crate) fn finish_stream(stream: ChunkStream) -> RpcResult<Reply> {
    Ok(Reply::Stream(stream))
}

pub(crate) fn finish_response(response: http::Response<Body>) -> RpcResult<Reply> {
    Ok(Reply::Response(response))
}

/// Erase a handler together with its schema and middlewares.
///
/// Invalid input is rejected before any middleware runs.
pub(crate) fn into_boxed<S, H, Fut, O>(
    schema: Arc<S>,
    middlewares: Arc<[MiddlewareFn]>,
    handler: H,
    finish: Finish<O>,
) -> BoxedHandler
where
    S: Schema,
    H: Fn(HandleArgs<S::Output>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<O>> + Send + 'static,
    O: Send + 'static,
{
    Arc::new(move |event, raw_input| {
        let schema = schema.clone();
        let middlewares = middlewares.clone();
        let handler = handler.clone();
        Box::pin(async move {
            trace!(input_kind = raw_input.kind(), "Validating procedure input");
            let input = match schema.validate(raw_input).await {
                Validation::Valid(input) => input,
                Validation::Invalid(issues) => {
                    warn!(
                        issue_count = issues.len(),
                        issues = ?issues.iter().map(ToString::to_string).collect::<Vec<_>>(),
                        "Input validation failed"
                    );
                    return Err(crate::error::RpcError::invalid_input(issues));
                }
            };

            let ctx = run_middlewares(&middlewares, &event).await?;

            trace!(ctx_keys = ctx.len(), "Executing procedure handler");
            let output = handler(HandleArgs { event, input, ctx })
                .await
                .inspect_err(|e| {
                    debug!(error_code = %e.code, error = %e.message, "Procedure handler returned error");
                })?;

            let reply = finish(output)?;
            trace!(reply = reply.kind(), "Procedure completed successfully");
            Ok(reply)
        })
    })
}
