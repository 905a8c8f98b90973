//! Middleware that builds a procedure's context
//!
//! A middleware sees the [`RequestEvent`] and returns a partial [`Context`]. A procedure's
//! middlewares run one after another in declaration order, and their contexts are merged
//! shallowly; on equal keys the later middleware wins. Failing middleware stops the call.
//!
//! Middlewares affect the response only through the event's capabilities (cookies, locals).
//!
//! # Example with function
//! ```rust,ignore
//! async fn session(event: RequestEvent) -> RpcResult<Context> {
//!     let token = event.cookies().get("session").ok_or_else(|| RpcError::unauthorized("No session"))?;
//!     Ok(Context::new().with("session", token))
//! }
//!
//! let p = procedure().use_middleware(session).handle(|args: HandleArgs<()>| async move { ... });
//! ```
//!
//! # Example with closure
//! ```rust,ignore
//! let tenant = "acme";
//! let p = procedure()
//!     .use_middleware(move |_event: RequestEvent| async move { Ok(Context::new().with("tenant", tenant)) })
//!     .handle(|args: HandleArgs<()>| async move { ... });
//! ```

use crate::context::Context;
use crate::error::RpcResult;
use crate::event::RequestEvent;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

/// Future returned by a middleware.
pub type MiddlewareFuture = Pin<Box<dyn Future<Output = RpcResult<Context>> + Send>>;

/// Type-erased middleware as stored on a procedure.
pub type MiddlewareFn = Arc<dyn Fn(RequestEvent) -> MiddlewareFuture + Send + Sync>;

/// Produces a partial context for a call.
///
/// Implemented for every `Fn(RequestEvent) -> impl Future<Output = RpcResult<Context>>`.
pub trait Middleware: Send + Sync + 'static {
    fn run(&self, event: RequestEvent) -> MiddlewareFuture;
}

impl<F, Fut> Middleware for F
where
    F: Fn(RequestEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Context>> + Send + 'static,
{
    fn run(&self, event: RequestEvent) -> MiddlewareFuture {
        Box::pin((self)(event))
    }
}

/// Erase a middleware's type.
pub fn from_fn<M: Middleware>(middleware: M) -> MiddlewareFn {
    Arc::new(move |event| middleware.run(event))
}

/// Run middlewares in order and fold their contexts, last write wins.
pub(crate) async fn run_middlewares(
    middlewares: &[MiddlewareFn],
    event: &RequestEvent,
) -> RpcResult<Context> {
    let mut ctx = Context::new();
    for (index, middleware) in middlewares.iter().enumerate() {
        trace!(index, "Running middleware");
        let partial = middleware(event.clone()).await.inspect_err(|e| {
            debug!(index, error_code = %e.code, "Middleware rejected the call");
        })?;
        ctx.merge(partial);
    }
    Ok(ctx)
}
