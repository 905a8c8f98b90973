//! Path-capturing client proxy
//!
//! A [`Proxy`] carries a procedure path and a backend. Extending the path is cheap and
//! returns a new proxy; calling forwards `{path, input}` to the backend. There is no stub per
//! procedure:
//!
//! ```rust,ignore
//! let api = client.proxy();
//! let user: User = api.at("users").at("get").call(&GetUser { id: 1 }).await?;
//! let same: User = api.path("users.get").call(&GetUser { id: 1 }).await?;
//!
//! api.path("chat.reply")
//!     .stream(&"Hi", |chunk: Chunk<String>| println!("{}", chunk.chunk))
//!     .await?;
//! ```
//!
//! Backends implement [`Invoke`]: the HTTP [`Client`](crate::client::Client) and the
//! server-side in-process [`Caller`](crate::server::Caller).

use crate::client::ClientError;
use crate::stream::Chunk;
use crate::value::{Value, from_value, to_value};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Future returned by an [`Invoke`] backend.
pub type InvokeFuture<'a, T> = BoxFuture<'a, Result<T, ClientError>>;

/// Chunks of a streamed call, as delivered to the caller.
pub type ChunkResults = BoxStream<'static, Result<Chunk, ClientError>>;

/// Executes calls captured by a [`Proxy`].
pub trait Invoke: Send + Sync {
    /// Call the procedure at `path` and return its single result.
    fn invoke<'a>(&'a self, path: &'a [String], input: Value) -> InvokeFuture<'a, Value>;

    /// Call a streaming procedure and return its chunks.
    fn invoke_stream<'a>(&'a self, path: &'a [String], input: Value)
    -> InvokeFuture<'a, ChunkResults>;
}

/// A procedure path bound to a backend.
#[derive(Clone)]
pub struct Proxy {
    backend: Arc<dyn Invoke>,
    path: Vec<String>,
}

impl Proxy {
    /// Proxy at the root of the backend's router.
    pub fn new(backend: Arc<dyn Invoke>) -> Self {
        Self {
            backend,
            path: Vec::new(),
        }
    }

    /// Extend the path by one segment.
    #[must_use]
    pub fn at(&self, segment: impl Into<String>) -> Proxy {
        let mut path = self.path.clone();
        path.push(segment.into());
        Proxy {
            backend: self.backend.clone(),
            path,
        }
    }

    /// Extend the path by a dotted suffix, e.g. `"users.get"`.
    #[must_use]
    pub fn path(&self, dotted: &str) -> Proxy {
        dotted
            .split('.')
            .filter(|segment| !segment.is_empty())
            .fold(self.clone(), |proxy, segment| proxy.at(segment))
    }

    /// Segments captured so far.
    pub fn segments(&self) -> &[String] {
        &self.path
    }

    /// Call with typed input and output.
    pub async fn call<I, O>(&self, input: &I) -> Result<O, ClientError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let input = to_value(input).map_err(ClientError::encode)?;
        let output = self.call_value(input).await?;
        from_value(output).map_err(ClientError::decode)
    }

    /// Call with untyped input and output.
    pub async fn call_value(&self, input: Value) -> Result<Value, ClientError> {
        trace!(path = %self, "Proxy call");
        self.backend.invoke(&self.path, input).await
    }

    /// Call a streaming procedure, invoking `callback` once per chunk.
    ///
    /// Returns after the last chunk, or with the first error. Chunks delivered before an error
    /// stay delivered.
    pub async fn stream<I, T, F>(&self, input: &I, mut callback: F) -> Result<(), ClientError>
    where
        I: Serialize + ?Sized,
        T: DeserializeOwned,
        F: FnMut(Chunk<T>),
    {
        let mut chunks = self.chunks(input).await?;
        while let Some(chunk) = chunks.next().await {
            let Chunk { chunk, first } = chunk?;
            let chunk = from_value(chunk).map_err(ClientError::decode)?;
            callback(Chunk { chunk, first });
        }
        Ok(())
    }

    /// Call a streaming procedure and get its chunks as a stream.
    pub async fn chunks<I>(&self, input: &I) -> Result<ChunkResults, ClientError>
    where
        I: Serialize + ?Sized,
    {
        let input = to_value(input).map_err(ClientError::encode)?;
        trace!(path = %self, "Proxy stream");
        self.backend.invoke_stream(&self.path, input).await
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join("."))
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy").field("path", &self.path).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records calls and echoes the path back.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<String>, Value)>>,
    }

    impl Invoke for Recorder {
        fn invoke<'a>(&'a self, path: &'a [String], input: Value) -> InvokeFuture<'a, Value> {
            Box::pin(async move {
                self.calls.lock().unwrap().push((path.to_vec(), input));
                Ok(Value::from(path.join("/")))
            })
        }

        fn invoke_stream<'a>(
            &'a self,
            _path: &'a [String],
            input: Value,
        ) -> InvokeFuture<'a, ChunkResults> {
            Box::pin(async move {
                let chunks = vec![
                    Ok(Chunk { chunk: input.clone(), first: true }),
                    Ok(Chunk { chunk: input, first: false }),
                ];
                Ok(futures::stream::iter(chunks).boxed())
            })
        }
    }

    #[tokio::test]
    async fn test_path_capture() {
        let recorder = Arc::new(Recorder::default());
        let api = Proxy::new(recorder.clone());
        let users = api.at("users");
        let out: String = users.at("get").call(&7).await.unwrap();
        assert_eq!(out, "users/get");
        assert!(api.segments().is_empty());
        assert_eq!(users.segments(), ["users"]);

        let out: String = api.path("a.b.c").call(&()).await.unwrap();
        assert_eq!(out, "a/b/c");

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls[0].1, Value::from(7));
        assert_eq!(calls[1].1, Value::Null);
    }

    #[tokio::test]
    async fn test_stream_callback() {
        let api = Proxy::new(Arc::new(Recorder::default()));
        let mut seen = Vec::new();
        api.path("ticks")
            .stream(&"tick", |chunk: Chunk<String>| seen.push((chunk.chunk, chunk.first)))
            .await
            .unwrap();
        assert_eq!(
            seen,
            vec![("tick".to_string(), true), ("tick".to_string(), false)]
        );
    }
}
