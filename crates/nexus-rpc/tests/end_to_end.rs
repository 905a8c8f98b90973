//! Integration tests for the full RPC round trip
//!
//! Every call goes through the real HTTP path: the client encodes a multipart request, the
//! loopback transport hands it to the dispatch engine, and the reply is decoded client-side.

use chrono::{DateTime, TimeZone, Utc};
use futures::stream::StreamExt;
use nexus_rpc::codec::{WireFormat, multipart, tagged};
use nexus_rpc::event::CookieOptions;
use nexus_rpc::validation::{Issue, Validate, Validated, ValidationResult, ValidationRules, from_fn};
use nexus_rpc::{
    Blob, Body, CLIENT_HEADER, CancellationSignal, Caller, Chunk, ChunkStream, Client,
    ClientConfig, ClientError, Context, HandleArgs, LoopbackTransport, RequestEvent, Router,
    RpcConfig, RpcError, RpcHandler, Value, procedure, typed,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

// =============================================================================
// Test Router
// =============================================================================

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct CreateUser {
    name: String,
    email: String,
}

impl Validate for CreateUser {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .required("name", &self.name)
            .email("email", &self.email)
            .build()
    }
}

#[derive(Debug, Deserialize)]
struct DatedInput {
    test: String,
    #[serde(with = "nexus_rpc::value::date")]
    date: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct User {
    id: u32,
    name: String,
}

type SignalSlot = Arc<Mutex<Option<Arc<CancellationSignal>>>>;

fn router(signal: SignalSlot) -> Router {
    let math = Router::new().procedure(
        "double",
        procedure()
            .input(typed::<i64>())
            .handle(|args| async move { Ok(args.input * 2) }),
    );

    let users = Router::new().procedure(
        "create",
        procedure()
            .input(Validated::<CreateUser>::new())
            .handle(|args| async move {
                Ok(User {
                    id: 1,
                    name: args.input.name,
                })
            }),
    );

    Router::new()
        .procedure(
            "test.object",
            procedure()
                .input(typed::<DatedInput>())
                .handle(|args| async move {
                    let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
                    if args.input.test != "abc" || args.input.date != expected {
                        return Err(RpcError::bad_request("Unexpected input"));
                    }
                    Ok(serde_json::json!({ "data": true }))
                }),
        )
        .procedure(
            "echo",
            procedure()
                .input(from_fn(|input: Value| Ok::<_, Vec<Issue>>(input)))
                .handle(|args| async move { Ok(args.input) }),
        )
        .procedure(
            "login",
            procedure()
                .input(typed::<String>())
                .handle(|args| async move {
                    args.event
                        .cookies()
                        .set("session", "abc123", CookieOptions::new().with_path("/"));
                    args.event
                        .cookies()
                        .set("theme", "dark", CookieOptions::new().with_path("/"));
                    if args.input == "wrong" {
                        return Err(RpcError::unauthorized("Bad credentials"));
                    }
                    Ok(true)
                }),
        )
        .procedure(
            "whoami",
            procedure()
                .use_middleware(|event: RequestEvent| async move {
                    let token = event
                        .header("authorization")
                        .ok_or_else(|| RpcError::unauthorized("Missing token"))?
                        .to_string();
                    Ok(Context::new().with("token", token))
                })
                .handle(|args: HandleArgs<()>| async move {
                    Ok(args.ctx.require::<String>("token")?.clone())
                }),
        )
        .procedure(
            "quadruple",
            procedure()
                .input(typed::<i64>())
                .handle(|args| async move {
                    let api = args
                        .event
                        .locals()
                        .get::<Caller>("api")
                        .ok_or_else(|| RpcError::internal("No in-process caller"))?;
                    let doubled: i64 = api.call("math.double", &args.input).await?;
                    let quadrupled: i64 = api.call("math.double", &doubled).await?;
                    Ok(quadrupled)
                }),
        )
        .procedure(
            "avatar",
            procedure().handle(|_args| async {
                Ok(Blob::file("me.png", vec![0x89u8, b'P', b'N', b'G'], "image/png"))
            }),
        )
        .procedure(
            "raw",
            procedure().respond(|_args| async {
                Ok(http::Response::builder()
                    .status(http::StatusCode::ACCEPTED)
                    .header(http::header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("accepted"))
                    .map_err(RpcError::from)?)
            }),
        )
        .procedure(
            "chat.reply",
            procedure().input(typed::<String>()).stream(|args| async move {
                let words: Vec<String> = args.input.split(' ').map(str::to_string).collect();
                Ok(ChunkStream::from_chunks(words))
            }),
        )
        .procedure(
            "counter",
            procedure().input(typed::<u32>()).stream(|args| async move {
                let chunks = (0..args.input).map(|n| serde_json::json!({ "count": n }));
                Ok(ChunkStream::from_chunks(chunks.collect::<Vec<_>>()))
            }),
        )
        .procedure(
            "ticker",
            procedure().stream(move |args: HandleArgs<()>| {
                let signal = signal.clone();
                async move {
                    *signal.lock().unwrap() = Some(args.event.signal().clone());
                    let interval = tokio::time::interval(Duration::from_millis(1));
                    let ticks = IntervalStream::new(interval)
                        .enumerate()
                        .map(|(n, _)| Ok::<_, RpcError>(n as u64));
                    Ok(ChunkStream::new(ticks))
                }
            }),
        )
        .merge("math", math)
        .merge("users", users)
}

fn handler_with(config: RpcConfig) -> RpcHandler {
    RpcHandler::new(router(SignalSlot::default()), config).unwrap()
}

fn client() -> Client {
    Client::loopback(handler_with(RpcConfig::default()))
}

fn client_with(config: ClientConfig) -> Client {
    let handler = handler_with(RpcConfig::default());
    Client::new(config, LoopbackTransport::new(handler))
}

const DATED_INPUT: &str = r#"{"test":"abc","date":"2024-01-01T00:00:00.000Z"}"#;

async fn raw_post(handler: &RpcHandler, uri: &str, body: &'static str) -> http::Response<Body> {
    let request = http::Request::post(uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap();
    handler
        .handle(request, |_event, _request| async {
            http::Response::new(Body::from("fallback"))
        })
        .await
}

async fn body_text(response: http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// =============================================================================
// Plain JSON callers
// =============================================================================

#[tokio::test]
async fn test_plain_json_call() {
    let handler = handler_with(RpcConfig::default());
    let response = raw_post(&handler, "/api/test/object", DATED_INPUT).await;
    assert_eq!(response.status(), http::StatusCode::OK);
    assert_eq!(
        response.headers()[http::header::CONTENT_TYPE],
        "application/json"
    );
    assert_eq!(body_text(response).await, r#"{"result":{"data":true}}"#);
}

#[tokio::test]
async fn test_tagged_form_call_reaches_the_same_procedure() {
    let handler = handler_with(RpcConfig::default());
    let input = Value::object([
        ("test", Value::from("abc")),
        ("date", Value::date(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
    ]);
    let (content_type, body) = multipart::encode(&tagged::encode(&input));
    let request = http::Request::post("/api/test/object")
        .header(http::header::CONTENT_TYPE, content_type)
        .header(CLIENT_HEADER, "true")
        .body(Body::from(body))
        .unwrap();
    let response = handler
        .handle(request, |_event, _request| async { http::Response::new(Body::empty()) })
        .await;
    assert_eq!(response.status(), http::StatusCode::OK);

    let content_type = response.headers()[http::header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .to_string();
    let bytes = response.into_body().collect().await.unwrap();
    let form = multipart::decode(&content_type, bytes).await.unwrap();
    assert_eq!(
        tagged::decode(&form).unwrap(),
        Value::object([("data", true)])
    );
}

#[tokio::test]
async fn test_plain_json_validation_error() {
    let handler = handler_with(RpcConfig::default());
    let response = raw_post(&handler, "/api/users/create", r#"{"name":"","email":"x"}"#).await;
    assert_eq!(response.status(), http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert!(body["error"].is_string());
    assert_eq!(body["issues"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_requests_outside_endpoint_reach_the_host() {
    let handler = handler_with(RpcConfig::default());
    let response = raw_post(&handler, "/index.html", "").await;
    assert_eq!(body_text(response).await, "fallback");

    let disabled = handler_with(RpcConfig::new().without_endpoint());
    let response = raw_post(&disabled, "/api/test/object", DATED_INPUT).await;
    assert_eq!(body_text(response).await, "fallback");
}

#[tokio::test]
async fn test_custom_endpoint() {
    let handler = handler_with(RpcConfig::new().with_endpoint("/rpc/v1"));
    let response = raw_post(&handler, "/rpc/v1/math/double", "4").await;
    assert_eq!(body_text(response).await, r#"{"result":8}"#);
}

#[tokio::test]
async fn test_oversized_input_is_rejected() {
    let handler = handler_with(RpcConfig::new().with_max_input_size(8));
    let response = raw_post(&handler, "/api/echo", r#""far more than eight bytes""#).await;
    assert_eq!(response.status(), http::StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_cookies_are_written_on_success_only() {
    let handler = handler_with(RpcConfig::default());

    let response = raw_post(&handler, "/api/login", r#""secret""#).await;
    assert_eq!(response.status(), http::StatusCode::OK);
    let cookies: Vec<&str> = response
        .headers()
        .get_all(http::header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap())
        .collect();
    assert_eq!(cookies.len(), 2);
    assert!(cookies[0].starts_with("session=abc123"));
    assert!(cookies[1].starts_with("theme=dark"));
    assert!(cookies.iter().all(|cookie| cookie.contains("Path=/")));

    let response = raw_post(&handler, "/api/login", r#""wrong""#).await;
    assert_eq!(response.status(), http::StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(http::header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_matching_client_without_form_gets_a_form() {
    let handler = handler_with(RpcConfig::default());
    let request = http::Request::post("/api/math/double")
        .header(http::header::CONTENT_TYPE, "application/json")
        .header(CLIENT_HEADER, "true")
        .body(Body::from("5"))
        .unwrap();
    let response = handler
        .handle(request, |_event, _request| async { http::Response::new(Body::empty()) })
        .await;
    let content_type = response.headers()[http::header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("multipart/form-data"));
}

// =============================================================================
// Client round trips
// =============================================================================

#[tokio::test]
async fn test_typed_call_through_proxy() {
    let api = client().proxy();
    let doubled: i64 = api.at("math").at("double").call(&21).await.unwrap();
    assert_eq!(doubled, 42);

    let user: User = api
        .path("users.create")
        .call(&CreateUser {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(user, User { id: 1, name: "Ada".to_string() });
}

#[tokio::test]
async fn test_rich_values_survive_both_wire_formats() {
    let at = Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap();
    let input = Value::object([
        ("when", Value::Date(at)),
        ("missing", Value::Undefined),
        ("tags", Value::Set(vec![Value::from("a"), Value::from("b")])),
        (
            "scores",
            Value::Map(vec![(Value::from(1), Value::from("one")), (Value::from("two"), Value::from(2))]),
        ),
        ("home", Value::Url("https://example.com/home".parse().unwrap())),
        ("doc", Value::Blob(Blob::file("notes.txt", "hello", "text/plain"))),
        ("nested", Value::object([("empty", Value::Array(vec![]))])),
    ]);

    for format in [WireFormat::Structured, WireFormat::Tagged] {
        let client = client_with(ClientConfig::new().with_wire_format(format));
        let echoed = client.proxy().at("echo").call_value(input.clone()).await.unwrap();
        assert_eq!(echoed, input, "format {:?}", format);
    }
}

#[tokio::test]
async fn test_undefined_input_and_output() {
    let echoed = client().proxy().at("echo").call_value(Value::Undefined).await.unwrap();
    assert_eq!(echoed, Value::Undefined);
}

#[tokio::test]
async fn test_blob_result_keeps_its_file_name() {
    let value = client().proxy().at("avatar").call_value(Value::Undefined).await.unwrap();
    let blob = value.as_blob().unwrap();
    assert_eq!(blob.name.as_deref(), Some("me.png"));
    assert_eq!(blob.media_type, "image/png");
    assert_eq!(&blob.data[..], &[0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn test_raw_response_reaches_the_client_as_a_blob() {
    let value = client().proxy().at("raw").call_value(Value::Undefined).await.unwrap();
    let blob = value.as_blob().unwrap();
    assert_eq!(blob.media_type, "text/plain");
    assert_eq!(blob.text(), "accepted");
}

#[tokio::test]
async fn test_errors_are_normalized() {
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = failures.clone();
    let client = client_with(ClientConfig::new().on_error(move |_error| {
        seen.fetch_add(1, Ordering::SeqCst);
    }));
    let api = client.proxy();

    let err: ClientError = api
        .path("users.create")
        .call::<_, User>(&CreateUser {
            name: String::new(),
            email: "nope".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.status, 400);
    assert_eq!(err.status_text, "Bad Request");
    assert_eq!(err.issues.len(), 2);

    let err = api.path("users.delete").call_value(Value::Undefined).await.unwrap_err();
    assert_eq!(err.status, 404);
    assert_eq!(err.status_text, "Not Found");
    assert!(err.error.contains("users.delete"));

    assert_eq!(failures.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_call_pair() {
    let client = client();
    let (result, error) = client.call_pair::<_, i64>("math.double", &2).await;
    assert_eq!(result, Some(4));
    assert!(error.is_none());

    let (result, error) = client.call_pair::<_, i64>("math.double", &"two").await;
    assert!(result.is_none());
    assert_eq!(error.unwrap().status, 400);
}

#[tokio::test]
async fn test_headers_reach_middlewares() {
    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::AUTHORIZATION, "Bearer static".parse().unwrap());
    let token: String = client_with(ClientConfig::new().with_headers(headers))
        .proxy()
        .at("whoami")
        .call(&())
        .await
        .unwrap();
    assert_eq!(token, "Bearer static");

    let computed = client_with(ClientConfig::new().with_header_fn(|path, _input| {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::header::AUTHORIZATION,
            format!("Bearer {}", path).parse().unwrap(),
        );
        headers
    }));
    let token: String = computed.proxy().at("whoami").call(&()).await.unwrap();
    assert_eq!(token, "Bearer whoami");

    let err = client().proxy().at("whoami").call_value(Value::Undefined).await.unwrap_err();
    assert_eq!(err.status, 401);
}

#[tokio::test]
async fn test_in_process_caller_from_locals() {
    let quadrupled: i64 = client().proxy().at("quadruple").call(&3).await.unwrap();
    assert_eq!(quadrupled, 12);

    let disabled = Client::loopback(handler_with(RpcConfig::new().without_locals_key()));
    let err = disabled.proxy().at("quadruple").call_value(Value::from(3)).await.unwrap_err();
    assert_eq!(err.status, 500);
}

// =============================================================================
// Streaming
// =============================================================================

#[tokio::test]
async fn test_text_stream() {
    let mut words = Vec::new();
    client()
        .proxy()
        .path("chat.reply")
        .stream(&"Hello streaming world", |chunk: Chunk<String>| {
            words.push((chunk.chunk, chunk.first))
        })
        .await
        .unwrap();
    assert_eq!(
        words,
        vec![
            ("Hello".to_string(), true),
            ("streaming".to_string(), false),
            ("world".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_json_stream() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Count {
        count: u32,
    }

    let mut counts = Vec::new();
    client()
        .proxy()
        .at("counter")
        .stream(&3, |chunk: Chunk<Count>| counts.push(chunk.chunk.count))
        .await
        .unwrap();
    assert_eq!(counts, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_stream_collected_by_plain_call() {
    let value = client().proxy().at("counter").call_value(Value::from(2)).await.unwrap();
    assert_eq!(
        value,
        Value::Array(vec![
            Value::object([("count", 0)]),
            Value::object([("count", 1)]),
        ])
    );
}

#[tokio::test]
async fn test_streaming_a_single_value_yields_one_chunk() {
    let chunks: Vec<_> = client()
        .proxy()
        .path("math.double")
        .chunks(&5)
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(chunks.len(), 1);
    let chunk = chunks.into_iter().next().unwrap().unwrap();
    assert_eq!(chunk, Chunk { chunk: Value::from(10), first: true });
}

#[tokio::test]
async fn test_dropping_a_stream_cancels_the_request() {
    let slot = SignalSlot::default();
    let client = Client::loopback(RpcHandler::new(router(slot.clone()), RpcConfig::default()).unwrap());

    let mut ticks = client.proxy().at("ticker").chunks(&()).await.unwrap();
    let first = ticks.next().await.unwrap().unwrap();
    assert_eq!(first, Chunk { chunk: Value::from("0"), first: true });

    let signal = slot.lock().unwrap().clone().unwrap();
    assert!(!signal.is_cancelled());
    drop(ticks);
    assert!(signal.is_cancelled());
}
