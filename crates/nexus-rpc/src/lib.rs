//! # Nexus RPC
//!
//! Typed remote procedure calls over a single HTTP endpoint, with a wire codec richer than
//! JSON and line-delimited streaming.
//!
//! ## Overview
//!
//! - **Procedures** with an optional input schema, an ordered middleware chain, and a handler
//! - **Router tree** mapping dotted paths (`users.get`) to procedures
//! - **Dispatch engine** serving `POST {endpoint}/{path}` and shaping replies
//! - **Wire codec** carrying dates, sets, maps, URLs, blobs, and `undefined` through multipart
//!   forms, with plain JSON for everyone else
//! - **Streaming** of chunked results, first chunk flagged, JSON or plain text per line
//! - **Client proxy** that captures a path and forwards calls to HTTP or an in-process caller
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐            ┌──────────────────────────────────────┐
//! │ Client                       │            │ RpcHandler                           │
//! │  Proxy ── path + input       │   HTTP     │  decode ─► resolve ─► validate       │
//! │   │                          │ ─────────► │     ─► middlewares ─► handler        │
//! │   ▼                          │            │                          │           │
//! │  codec (tagged/structured)   │ ◄───────── │  shape: {result} | form | blob | ... │
//! │  ChunkDecoder                │            │         text/event-stream            │
//! └──────────────────────────────┘            └──────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ### 1. Define procedures
//!
//! ```rust,ignore
//! use nexus_rpc::prelude::*;
//!
//! #[derive(Deserialize)]
//! struct GetUser { id: u32 }
//!
//! let get_user = procedure()
//!     .use_middleware(|event: RequestEvent| async move {
//!         let token = event.cookies().get("session").ok_or_else(|| RpcError::unauthorized("No session"))?;
//!         Ok(Context::new().with("session", token))
//!     })
//!     .input(typed::<GetUser>())
//!     .handle(|args| async move { load_user(args.input.id).await });
//! ```
//!
//! ### 2. Build the router
//!
//! ```rust,ignore
//! let router = Router::new()
//!     .procedure("health", procedure().handle(|_args| async { Ok("healthy") }))
//!     .merge("users", Router::new().procedure("get", get_user));
//! ```
//!
//! ### 3. Serve it
//!
//! ```rust,ignore
//! let rpc = RpcHandler::new(router, RpcConfig::default())?;
//! let response = rpc.handle(request, |_event, request| async move { fallback(request).await }).await;
//! ```
//!
//! ### 4. Call it
//!
//! ```rust,ignore
//! let client = Client::new(ClientConfig::new().with_base_url("http://localhost:3000"), ReqwestTransport::new());
//! let user: User = client.proxy().path("users.get").call(&GetUser { id: 1 }).await?;
//! ```
//!
//! ## Streaming
//!
//! ```rust,ignore
//! let ticks = procedure().stream(|_args| async {
//!     Ok(ChunkStream::new(async_stream::stream! {
//!         for n in 0..3u32 {
//!             yield Ok(Value::from(n));
//!         }
//!     }))
//! });
//!
//! client
//!     .proxy()
//!     .path("ticks")
//!     .stream(&(), |chunk: Chunk<u32>| println!("{} first={}", chunk.chunk, chunk.first))
//!     .await?;
//! ```
//!
//! ## Module Structure
//!
//! - [`value`] - Value universe and serde bridge
//! - [`codec`] - Tagged, structured, JSON, and multipart encodings
//! - [`validation`] - Schema trait and adapters
//! - [`procedure`] - Procedure builder and middleware chain
//! - [`router`] - Router tree and path resolution
//! - [`server`] - Dispatch engine and in-process caller
//! - [`stream`] - Streaming protocol
//! - [`proxy`] / [`client`] - Client proxy and HTTP client
//! - [`event`] - Request event with cookies, locals, and cancellation

pub mod body;
pub mod client;
pub mod codec;
mod config;
mod context;
mod error;
pub mod event;
pub mod handler;
pub mod logging;
pub mod middleware;
#[cfg(feature = "tauri")]
pub mod plugin;
pub mod procedure;
pub mod proxy;
pub mod router;
pub mod server;
pub mod stream;
pub mod validation;
pub mod value;

#[cfg(test)]
mod tests;

// Public API
pub use body::Body;
pub use client::{Client, ClientConfig, ClientError, Headers, LoopbackTransport, Transport};
#[cfg(feature = "http-client")]
pub use client::ReqwestTransport;
pub use codec::{CodecError, FormData, FormValue, WireFormat};
pub use config::{
    ConfigValidationError, DEFAULT_ENDPOINT, DEFAULT_LOCALS_KEY, DEFAULT_MAX_INPUT_SIZE,
    RpcConfig,
};
pub use context::Context;
pub use error::{ErrorBody, ErrorConfig, RpcError, RpcErrorCode, RpcResult, error};
pub use event::{
    CancellationSignal, CookieJar, CookieMutation, CookieOptions, Locals, RequestEvent,
};
pub use handler::{HandleArgs, Reply};
pub use middleware::{Middleware, MiddlewareFn, from_fn};
pub use procedure::{NoInput, Procedure, ProcedureBuilder, ProcedureKind, procedure};
pub use proxy::{Invoke, Proxy};
pub use router::{Node, Router};
pub use server::{CLIENT_HEADER, Caller, RpcHandler};
pub use stream::{Chunk, ChunkDecoder, ChunkStream, StreamMode};
pub use validation::{
    Issue, Optional, Schema, Typed, Validate, Validated, Validation, ValidationRules, typed,
};
pub use value::{Blob, Value, from_value, to_value};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use nexus_rpc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Blob, Caller, Chunk, ChunkStream, Client, ClientConfig, ClientError, Context, HandleArgs,
        LoopbackTransport, NoInput, Procedure, Proxy, RequestEvent, Router, RpcConfig, RpcError,
        RpcErrorCode, RpcHandler, RpcResult, Schema, Validation, Value, procedure, typed,
    };

    #[cfg(feature = "http-client")]
    pub use crate::ReqwestTransport;

    pub use serde::{Deserialize, Serialize};
}
