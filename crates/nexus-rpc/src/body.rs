//! HTTP bodies

use crate::error::{RpcError, RpcResult};
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;

/// Request or response body: fully buffered, or a stream of byte chunks.
pub enum Body {
    Full(Bytes),
    Stream(BoxStream<'static, RpcResult<Bytes>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Full(Bytes::new())
    }

    /// Wrap a stream of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = RpcResult<Bytes>> + Send + 'static,
    {
        Body::Stream(stream.boxed())
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Buffer the whole body.
    pub async fn collect(self) -> RpcResult<Bytes> {
        match self {
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// Buffer at most `limit` bytes; larger bodies fail with `PAYLOAD_TOO_LARGE`.
    pub async fn collect_limited(self, limit: usize) -> RpcResult<Bytes> {
        let too_large = |size: usize| {
            RpcError::payload_too_large(format!(
                "Input size {} bytes exceeds maximum {} bytes",
                size, limit
            ))
        };
        match self {
            Body::Full(bytes) if bytes.len() > limit => Err(too_large(bytes.len())),
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(mut stream) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    if buffer.len() + chunk.len() > limit {
                        return Err(too_large(buffer.len() + chunk.len()));
                    }
                    buffer.extend_from_slice(&chunk);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// View the body as a stream of chunks.
    pub fn into_stream(self) -> BoxStream<'static, RpcResult<Bytes>> {
        match self {
            Body::Full(bytes) if bytes.is_empty() => futures::stream::empty().boxed(),
            Body::Full(bytes) => futures::stream::once(async move { Ok(bytes) }).boxed(),
            Body::Stream(stream) => stream,
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Full(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Full(Bytes::from_static(text.as_bytes()))
    }
}
