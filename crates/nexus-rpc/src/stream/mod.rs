//! Chunked delivery of async sequences
//!
//! A streaming procedure returns a [`ChunkStream`]. The server writes one chunk per line
//! (`\n`-terminated) into a `text/event-stream` body:
//!
//! - If the first chunk is a structured value (object, array, null, date, set, map, URL), the
//!   line [`STREAM_MARKER`] is written first and every chunk is a line of JSON.
//! - Otherwise every chunk is written as text; blob chunks are decoded as UTF-8.
//!
//! Text chunks must not contain newlines; a newline inside a text chunk splits it into two
//! chunks on the client.
//!
//! The client side is [`ChunkDecoder`], which tolerates reads that split or coalesce lines.

mod decoder;
mod encoder;

pub use decoder::ChunkDecoder;
pub use encoder::encode;

use crate::error::RpcResult;
use crate::value::{Value, to_value};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::Serialize;
use std::future::Future;

/// First line of a stream whose chunks are JSON.
pub const STREAM_MARKER: &str = "%#%OBJECT%#%";

/// Content type of streamed responses.
pub const EVENT_STREAM: &str = "text/event-stream";

/// How chunks of one stream are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// One line of JSON per chunk, announced by the marker line
    Json,
    /// One line of text per chunk
    Text,
}

impl StreamMode {
    /// Mode decided by a stream's first chunk.
    pub fn for_first_chunk(chunk: &Value) -> Self {
        if chunk.is_structured() {
            StreamMode::Json
        } else {
            StreamMode::Text
        }
    }
}

/// A delivered chunk and whether it is the first of its stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T = Value> {
    pub chunk: T,
    pub first: bool,
}

type StartHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type ChunkHook = Box<dyn FnMut(Chunk) -> BoxFuture<'static, ()> + Send>;
type EndHook = Box<dyn FnOnce(Vec<Value>) -> BoxFuture<'static, ()> + Send>;

/// Lifecycle callbacks of a server stream.
///
/// `on_start` runs before the first chunk, `on_chunk` for every chunk, `on_end` with all chunks
/// once the sequence completes normally. None of them run after a failure.
#[derive(Default)]
pub struct StreamHooks {
    pub(crate) on_start: Option<StartHook>,
    pub(crate) on_chunk: Option<ChunkHook>,
    pub(crate) on_end: Option<EndHook>,
}

/// The sequence returned by a streaming procedure.
///
/// ```rust,ignore
/// let p = procedure().stream(|_args| async move {
///     let words = futures::stream::iter(["Hello", "world"]).map(Ok);
///     Ok(ChunkStream::new(words).on_end(|all| async move {
///         tracing::info!(count = all.len(), "Stream finished");
///     }))
/// });
/// ```
pub struct ChunkStream {
    pub(crate) inner: BoxStream<'static, RpcResult<Value>>,
    pub(crate) hooks: StreamHooks,
}

impl ChunkStream {
    /// Wrap a fallible stream of serializable chunks.
    pub fn new<S, T>(stream: S) -> Self
    where
        S: Stream<Item = RpcResult<T>> + Send + 'static,
        T: Serialize,
    {
        Self {
            inner: stream
                .map(|item| item.and_then(|chunk| Ok(to_value(&chunk)?)))
                .boxed(),
            hooks: StreamHooks::default(),
        }
    }

    /// Stream a fixed list of chunks.
    pub fn from_chunks<I, T>(chunks: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Serialize + 'static,
    {
        Self::new(futures::stream::iter(chunks.into_iter().map(Ok)))
    }

    #[must_use]
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_start = Some(Box::new(move || Box::pin(hook())));
        self
    }

    #[must_use]
    pub fn on_chunk<F, Fut>(mut self, mut hook: F) -> Self
    where
        F: FnMut(Chunk) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_chunk = Some(Box::new(move |chunk| Box::pin(hook(chunk))));
        self
    }

    #[must_use]
    pub fn on_end<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.on_end = Some(Box::new(move |chunks| Box::pin(hook(chunks))));
        self
    }

    /// Consume the stream in-process, firing hooks as chunks are pulled.
    pub fn into_chunks(self) -> BoxStream<'static, RpcResult<Chunk>> {
        encoder::drive(self, |chunk, first| {
            Ok(Chunk {
                chunk: chunk.clone(),
                first,
            })
        })
    }
}

impl std::fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStream")
            .field("on_start", &self.hooks.on_start.is_some())
            .field("on_chunk", &self.hooks.on_chunk.is_some())
            .field("on_end", &self.hooks.on_end.is_some())
            .finish_non_exhaustive()
    }
}
