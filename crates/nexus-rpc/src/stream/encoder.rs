use super::{Chunk, ChunkStream, STREAM_MARKER, StreamMode};
use crate::codec::json::to_json;
use crate::error::{RpcError, RpcResult};
use crate::value::Value;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use tracing::{trace, warn};

fn line(chunk: &Value, mode: StreamMode) -> RpcResult<String> {
    match mode {
        StreamMode::Json => Ok(serde_json::to_string(&to_json(chunk)?)?),
        StreamMode::Text => Ok(match chunk {
            Value::String(text) => text.clone(),
            Value::Blob(blob) => blob.text(),
            other => other.to_string(),
        }),
    }
}

/// Run a chunk stream to completion, firing its hooks.
///
/// Each chunk goes through `emit` before `on_chunk` runs, so a chunk that cannot be emitted
/// ends the stream without reaching the hook. Between two chunks the task yields so each
/// chunk tends to reach the consumer on its own.
pub(super) fn drive<T, F>(chunks: ChunkStream, mut emit: F) -> BoxStream<'static, RpcResult<T>>
where
    T: Send + 'static,
    F: FnMut(&Value, bool) -> RpcResult<T> + Send + 'static,
{
    let ChunkStream {
        mut inner,
        mut hooks,
    } = chunks;

    async_stream::stream! {
        if let Some(on_start) = hooks.on_start.take() {
            on_start().await;
        }

        let mut delivered = Vec::new();
        while let Some(item) = inner.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error_code = %e.code, error = %e.message, "Stream source failed");
                    yield Err(e);
                    return;
                }
            };
            let first = delivered.is_empty();
            if !first {
                tokio::task::yield_now().await;
            }

            let emitted = match emit(&chunk, first) {
                Ok(emitted) => emitted,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if let Some(on_chunk) = hooks.on_chunk.as_mut() {
                on_chunk(Chunk { chunk: chunk.clone(), first }).await;
            }
            delivered.push(chunk);
            yield Ok::<T, RpcError>(emitted);
        }

        if let Some(on_end) = hooks.on_end.take() {
            on_end(delivered).await;
        }
    }
    .boxed()
}

/// Turn a chunk stream into response body bytes, one line per chunk.
///
/// An error from the source or an unencodable chunk ends the body with that error.
pub fn encode(chunks: ChunkStream) -> BoxStream<'static, RpcResult<Bytes>> {
    let mut mode = None;
    drive(chunks, move |chunk, first| {
        let mode = *mode.get_or_insert_with(|| StreamMode::for_first_chunk(chunk));
        let text = line(chunk, mode).inspect_err(|e| {
            warn!(error = %e.message, "Stream chunk could not be encoded");
        })?;

        let mut out = BytesMut::with_capacity(text.len() + STREAM_MARKER.len() + 2);
        if first && mode == StreamMode::Json {
            out.put_slice(STREAM_MARKER.as_bytes());
            out.put_u8(b'\n');
        }
        out.put_slice(text.as_bytes());
        out.put_u8(b'\n');
        trace!(first, bytes = out.len(), "Writing stream chunk");
        Ok(out.freeze())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    async fn collect(chunks: ChunkStream) -> (String, Option<RpcError>) {
        let mut body = encode(chunks);
        let mut text = String::new();
        while let Some(item) = body.next().await {
            match item {
                Ok(bytes) => text.push_str(std::str::from_utf8(&bytes).unwrap()),
                Err(e) => return (text, Some(e)),
            }
        }
        (text, None)
    }

    #[tokio::test]
    async fn test_text_mode() {
        let (text, err) = collect(ChunkStream::from_chunks(["Hello", "world"])).await;
        assert_eq!(text, "Hello\nworld\n");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_json_mode_writes_marker_once() {
        let chunks = ChunkStream::from_chunks([
            Value::object([("n", 1)]),
            Value::object([("n", 2)]),
        ]);
        let (text, _) = collect(chunks).await;
        assert_eq!(text, "%#%OBJECT%#%\n{\"n\":1}\n{\"n\":2}\n");
    }

    #[tokio::test]
    async fn test_hooks_fire_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (start, chunk, end) = (log.clone(), log.clone(), log.clone());
        let chunks = ChunkStream::from_chunks(["a", "b"])
            .on_start(move || async move { start.lock().unwrap().push("start".to_string()) })
            .on_chunk(move |c| {
                let chunk = chunk.clone();
                async move { chunk.lock().unwrap().push(format!("{}:{}", c.chunk, c.first)) }
            })
            .on_end(move |all| async move { end.lock().unwrap().push(format!("end:{}", all.len())) });
        collect(chunks).await;
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start", "a:true", "b:false", "end:2"]
        );
    }

    #[tokio::test]
    async fn test_failure_skips_on_end() {
        let ended = Arc::new(Mutex::new(false));
        let flag = ended.clone();
        let source = futures::stream::iter(vec![
            Ok(Value::from("ok")),
            Err(RpcError::internal("source broke")),
        ]);
        let chunks = ChunkStream::new(source)
            .on_end(move |_| async move { *flag.lock().unwrap() = true });
        let (text, err) = collect(chunks).await;
        assert_eq!(text, "ok\n");
        assert_eq!(err.unwrap().message, "source broke");
        assert!(!*ended.lock().unwrap());
    }
}
