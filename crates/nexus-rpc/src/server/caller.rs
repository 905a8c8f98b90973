use crate::client::ClientError;
use crate::error::{RpcError, RpcResult};
use crate::event::{RequestEvent, WeakRequestEvent};
use crate::handler::Reply;
use crate::proxy::{ChunkResults, Invoke, InvokeFuture, Proxy};
use crate::router::Router;
use crate::stream::Chunk;
use crate::value::{Blob, OCTET_STREAM, Value};
use futures::stream::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Calls procedures in-process with the current request's event, bypassing HTTP.
///
/// The dispatch engine installs one in every event's locals, so host code and procedures can
/// reach the router:
///
/// ```rust,ignore
/// let api = event.locals().get::<Caller>("api").ok_or_else(|| RpcError::internal("no caller"))?;
/// let user: User = api.call("users.get", &GetUser { id: 1 }).await?;
/// ```
///
/// Input still goes through the procedure's schema and middlewares, and cookie mutations land
/// in the same jar as the outer call's.
#[derive(Clone)]
pub struct Caller {
    router: Arc<Router>,
    event: WeakRequestEvent,
}

impl Caller {
    pub(crate) fn new(router: Arc<Router>, event: &RequestEvent) -> Self {
        Self {
            router,
            event: event.downgrade(),
        }
    }

    /// The bound event, or a detached one once the request is gone.
    fn event(&self) -> RequestEvent {
        self.event.upgrade().unwrap_or_else(RequestEvent::detached)
    }

    /// Call the procedure at a dotted `path` with typed input and output.
    pub async fn call<I, O>(&self, path: &str, input: &I) -> RpcResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let input = crate::value::to_value(input)?;
        let output = into_value(&segments, self.reply(&segments, input).await?).await?;
        Ok(crate::value::from_value(output)?)
    }

    /// Call the procedure at `path` and return its raw reply.
    pub async fn reply(&self, path: &[String], input: Value) -> RpcResult<Reply> {
        trace!(path = %path.join("."), "In-process call");
        let procedure = self.router.resolve(path)?;
        procedure.call(self.event(), input).await
    }

    /// A proxy over this caller.
    pub fn proxy(&self) -> Proxy {
        Proxy::new(Arc::new(self.clone()))
    }
}

/// Flatten a single-value reply. Raw responses become a blob of their body.
async fn into_value(path: &[String], reply: Reply) -> RpcResult<Value> {
    match reply {
        Reply::Value(value) => Ok(value),
        Reply::Stream(_) => Err(RpcError::bad_request(format!(
            "Procedure '{}' streams its result; call it as a stream",
            path.join(".")
        ))),
        Reply::Response(response) => {
            let media_type = response
                .headers()
                .get(http::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or(OCTET_STREAM)
                .to_string();
            let body = response.into_body().collect().await?;
            Ok(Value::Blob(Blob::new(body, media_type)))
        }
    }
}

impl Invoke for Caller {
    fn invoke<'a>(&'a self, path: &'a [String], input: Value) -> InvokeFuture<'a, Value> {
        Box::pin(async move {
            let reply = self.reply(path, input).await?;
            Ok(into_value(path, reply).await?)
        })
    }

    fn invoke_stream<'a>(
        &'a self,
        path: &'a [String],
        input: Value,
    ) -> InvokeFuture<'a, ChunkResults> {
        Box::pin(async move {
            match self.reply(path, input).await? {
                Reply::Stream(chunks) => Ok(chunks
                    .into_chunks()
                    .map(|chunk| chunk.map_err(ClientError::from))
                    .boxed()),
                other => {
                    let chunk = into_value(path, other).await?;
                    Ok(futures::stream::iter([Ok(Chunk { chunk, first: true })]).boxed())
                }
            }
        })
    }
}

impl fmt::Debug for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("procedures", &self.router.procedures())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::handler::HandleArgs;
    use crate::procedure::procedure;
    use crate::stream::ChunkStream;
    use crate::validation::typed;

    fn router() -> Arc<Router> {
        Arc::new(
            Router::new()
                .procedure(
                    "math.double",
                    procedure()
                        .input(typed::<i64>())
                        .handle(|args| async move { Ok(args.input * 2) }),
                )
                .procedure(
                    "whoami",
                    procedure()
                        .use_middleware(|event: RequestEvent| async move {
                            Ok(Context::new().with("id", event.request_id().to_string()))
                        })
                        .handle(|args: HandleArgs<()>| async move {
                            Ok(args.ctx.require::<String>("id")?.clone())
                        }),
                )
                .procedure(
                    "count",
                    procedure().stream(|_args| async { Ok(ChunkStream::from_chunks([1, 2, 3])) }),
                ),
        )
    }

    #[tokio::test]
    async fn test_typed_call() {
        let event = RequestEvent::detached();
        let caller = Caller::new(router(), &event);
        let doubled: i64 = caller.call("math.double", &21).await.unwrap();
        assert_eq!(doubled, 42);
    }

    #[tokio::test]
    async fn test_call_shares_the_event() {
        let event = RequestEvent::detached();
        let caller = Caller::new(router(), &event);
        let id: String = caller.call("whoami", &()).await.unwrap();
        assert_eq!(id, event.request_id());
    }

    #[tokio::test]
    async fn test_stream_through_proxy() {
        let event = RequestEvent::detached();
        let api = Caller::new(router(), &event).proxy();
        let mut seen = Vec::new();
        api.at("count")
            .stream(&(), |chunk: Chunk<u32>| seen.push(chunk.chunk))
            .await
            .unwrap();
        assert_eq!(seen, vec![1, 2, 3]);

        let err = api.at("count").call_value(Value::Undefined).await.unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[tokio::test]
    async fn test_missing_procedure() {
        let event = RequestEvent::detached();
        let caller = Caller::new(router(), &event);
        let err = caller.call::<_, Value>("math.triple", &1).await.unwrap_err();
        assert_eq!(err.code, crate::error::RpcErrorCode::NotFound);
    }
}
