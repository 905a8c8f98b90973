//! Middleware tests - context folding, ordering and short-circuiting

use crate::context::Context;
use crate::error::{RpcError, RpcErrorCode};
use crate::event::RequestEvent;
use crate::handler::{HandleArgs, Reply};
use crate::middleware::{MiddlewareFn, from_fn};
use crate::procedure::procedure;
use crate::validation::typed;
use crate::value::Value;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn recording(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> MiddlewareFn {
    let log = log.clone();
    from_fn(move |_event: RequestEvent| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(name.to_string());
            Ok(Context::new().with(name, name.to_string()))
        }
    })
}

fn string_reply(reply: Reply) -> String {
    match reply {
        Reply::Value(Value::String(s)) => s,
        other => panic!("expected a string reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_middlewares_run_in_declaration_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let p = procedure()
        .middleware(recording(&log, "first"))
        .middleware(recording(&log, "second"))
        .middleware(recording(&log, "third"))
        .handle(|args: HandleArgs<()>| async move {
            let mut keys: Vec<&str> = args.ctx.keys().collect();
            keys.sort_unstable();
            Ok(keys.join(","))
        });

    let reply = p.call(RequestEvent::detached(), Value::Undefined).await.unwrap();
    assert_eq!(string_reply(reply), "first,second,third");
    assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_later_middleware_overrides_earlier_keys() {
    let p = procedure()
        .use_middleware(|_event: RequestEvent| async {
            Ok(Context::new().with("role", "guest".to_string()).with("tenant", 7u32))
        })
        .use_middleware(|_event: RequestEvent| async {
            Ok(Context::new().with("role", "admin".to_string()))
        })
        .handle(|args: HandleArgs<()>| async move {
            let role: &String = args.ctx.require("role")?;
            let tenant: &u32 = args.ctx.require("tenant")?;
            Ok(format!("{}@{}", role, tenant))
        });

    let reply = p.call(RequestEvent::detached(), Value::Undefined).await.unwrap();
    assert_eq!(string_reply(reply), "admin@7");
}

#[tokio::test]
async fn test_rejecting_middleware_stops_the_chain() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();
    let p = procedure()
        .middleware(recording(&log, "auth"))
        .use_middleware(|_event: RequestEvent| async {
            Err(RpcError::unauthorized("No session"))
        })
        .middleware(recording(&log, "after"))
        .handle(move |_args: HandleArgs<()>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

    let err = p.call(RequestEvent::detached(), Value::Undefined).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::Unauthorized);
    assert_eq!(*log.lock().unwrap(), vec!["auth"]);
    assert_eq!(handled.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_runs_before_middlewares() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let p = procedure()
        .middleware(recording(&log, "auth"))
        .input(typed::<u32>())
        .handle(|args| async move { Ok(args.input) });

    let err = p
        .call(RequestEvent::detached(), Value::from("not a number"))
        .await
        .unwrap_err();
    assert_eq!(err.code, RpcErrorCode::BadRequest);
    assert!(!err.issues.is_empty());
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_middleware_sees_the_request_event() {
    let p = procedure()
        .use_middleware(|event: RequestEvent| async move {
            let token = event
                .cookies()
                .get("session")
                .ok_or_else(|| RpcError::unauthorized("No session"))?;
            Ok(Context::new().with("session", token))
        })
        .handle(|args: HandleArgs<()>| async move { Ok(args.ctx.require::<String>("session")?.clone()) });

    let mut headers = http::HeaderMap::new();
    headers.insert(http::header::COOKIE, "session=abc123".parse().unwrap());
    let event = RequestEvent::new(http::Method::POST, "/api/me".parse().unwrap(), headers);
    let reply = p.call(event, Value::Undefined).await.unwrap();
    assert_eq!(string_reply(reply), "abc123");

    let err = p.call(RequestEvent::detached(), Value::Undefined).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::Unauthorized);
}

proptest! {
    /// Property: for any chain writing the same key, the handler sees the last write.
    #[test]
    fn prop_last_write_wins(values in prop::collection::vec(any::<u32>(), 1..6)) {
        let expected = *values.last().unwrap();
        let builder = values.iter().fold(procedure(), |builder, value| {
            let value = *value;
            builder.use_middleware(move |_event: RequestEvent| async move {
                Ok(Context::new().with("n", value))
            })
        });
        let p = builder.handle(|args: HandleArgs<()>| async move { Ok(*args.ctx.require::<u32>("n")?) });

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let reply = runtime.block_on(p.call(RequestEvent::detached(), Value::Undefined)).unwrap();
        prop_assert!(matches!(reply, Reply::Value(Value::Number(n)) if n == f64::from(expected)));
        prop_assert_eq!(p.middleware_count(), values.len());
    }
}
