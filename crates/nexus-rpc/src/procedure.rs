//! Procedure Builder API
//!
//! [`procedure()`] starts a fluent builder: attach middlewares in order, optionally an input
//! [`Schema`], then finish with one of three terminals:
//!
//! - [`handle`](ProcedureBuilder::handle): returns one serializable value (or a [`Blob`](crate::Blob))
//! - [`stream`](ProcedureBuilder::stream): returns a [`ChunkStream`]
//! - [`respond`](ProcedureBuilder::respond): returns a complete `http::Response`
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_rpc::prelude::*;
//!
//! #[derive(serde::Deserialize)]
//! struct GetUser { id: u32 }
//!
//! let get_user = procedure()
//!     .use_middleware(auth)
//!     .input(typed::<GetUser>())
//!     .handle(|args: HandleArgs<GetUser>| async move {
//!         let user: &User = args.ctx.require("user")?;
//!         Ok(serde_json::json!({ "id": args.input.id, "by": user.name }))
//!     });
//! ```

use crate::body::Body;
use crate::error::RpcResult;
use crate::event::RequestEvent;
use crate::handler::{
    BoxedHandler, HandleArgs, Reply, finish_response, finish_stream, finish_value, into_boxed,
};
use crate::context::Context;
use crate::middleware::{MiddlewareFn, from_fn};
use crate::stream::ChunkStream;
use crate::validation::{Schema, Validation, ValidationFuture};
use crate::value::Value;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Schema of a procedure declared without input; always passes with `()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl Schema for NoInput {
    type Output = ();

    fn validate(&self, _input: Value) -> ValidationFuture<'_, ()> {
        Box::pin(async { Validation::Valid(()) })
    }
}

/// What a procedure's handler produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    /// A single value or blob
    Call,
    /// An async sequence of chunks
    Stream,
    /// A complete HTTP response
    Raw,
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcedureKind::Call => "call",
            ProcedureKind::Stream => "stream",
            ProcedureKind::Raw => "raw",
        })
    }
}

/// Start building a procedure.
pub fn procedure() -> ProcedureBuilder<NoInput> {
    ProcedureBuilder {
        middlewares: Vec::new(),
        schema: NoInput,
    }
}

/// Builder returned by [`procedure()`].
pub struct ProcedureBuilder<S> {
    middlewares: Vec<MiddlewareFn>,
    schema: S,
}

impl<S: Schema> ProcedureBuilder<S> {
    /// Append a middleware. Middlewares run in the order they are added.
    #[must_use]
    pub fn use_middleware<F, Fut>(mut self, middleware: F) -> Self
    where
        F: Fn(RequestEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Context>> + Send + 'static,
    {
        self.middlewares.push(from_fn(middleware));
        self
    }

    /// Append an already erased middleware, e.g. one shared by several procedures.
    #[must_use]
    pub fn middleware(mut self, middleware: MiddlewareFn) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Validate input with `schema`; the handler receives its output.
    #[must_use]
    pub fn input<T: Schema>(self, schema: T) -> ProcedureBuilder<T> {
        ProcedureBuilder {
            middlewares: self.middlewares,
            schema,
        }
    }

    /// Finish with a handler returning one value.
    pub fn handle<H, Fut, O>(self, handler: H) -> Procedure
    where
        H: Fn(HandleArgs<S::Output>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<O>> + Send + 'static,
        O: Serialize + Send + 'static,
    {
        self.build(ProcedureKind::Call, handler, finish_value::<O>)
    }

    /// Finish with a handler returning a chunk stream.
    pub fn stream<H, Fut>(self, handler: H) -> Procedure
    where
        H: Fn(HandleArgs<S::Output>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<ChunkStream>> + Send + 'static,
    {
        self.build(ProcedureKind::Stream, handler, finish_stream)
    }

    /// Finish with a handler returning a complete response.
    pub fn respond<H, Fut>(self, handler: H) -> Procedure
    where
        H: Fn(HandleArgs<S::Output>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<http::Response<Body>>> + Send + 'static,
    {
        self.build(ProcedureKind::Raw, handler, finish_response)
    }

    fn build<H, Fut, O>(
        self,
        kind: ProcedureKind,
        handler: H,
        finish: fn(O) -> RpcResult<Reply>,
    ) -> Procedure
    where
        H: Fn(HandleArgs<S::Output>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<O>> + Send + 'static,
        O: Send + 'static,
    {
        let middleware_count = self.middlewares.len();
        info!(%kind, middleware_count, "Procedure built");
        let middlewares: Arc<[MiddlewareFn]> = self.middlewares.into();
        Procedure {
            kind,
            middleware_count,
            invoke: into_boxed(Arc::new(self.schema), middlewares, handler, finish),
        }
    }
}

/// An immutable procedure: schema, middlewares and handler.
#[derive(Clone)]
pub struct Procedure {
    kind: ProcedureKind,
    middleware_count: usize,
    invoke: BoxedHandler,
}

impl Procedure {
    pub fn kind(&self) -> ProcedureKind {
        self.kind
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware_count
    }

    /// Validate `input`, fold the middlewares and run the handler.
    pub async fn call(&self, event: RequestEvent, input: Value) -> RpcResult<Reply> {
        (self.invoke)(event, input).await
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("kind", &self.kind)
            .field("middleware_count", &self.middleware_count)
            .finish_non_exhaustive()
    }
}
