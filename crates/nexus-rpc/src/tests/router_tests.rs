//! Router tests - path resolution and composition

use crate::error::RpcErrorCode;
use crate::event::RequestEvent;
use crate::handler::Reply;
use crate::procedure::{Procedure, ProcedureKind, procedure};
use crate::router::{Node, Router};
use crate::stream::ChunkStream;
use crate::value::Value;
use proptest::prelude::*;

fn named(name: &'static str) -> Procedure {
    procedure().handle(move |_args| async move { Ok(name) })
}

async fn call(router: &Router, path: &[&str]) -> Value {
    let p = router.resolve(path).unwrap();
    match p.call(RequestEvent::detached(), Value::Undefined).await.unwrap() {
        Reply::Value(value) => value,
        other => panic!("expected a value, got {:?}", other),
    }
}

fn sample() -> Router {
    Router::new()
        .procedure("health", named("health"))
        .procedure("users.get", named("users.get"))
        .procedure("users.list", named("users.list"))
        .merge(
            "admin",
            Router::new()
                .procedure("stats", named("admin.stats"))
                .procedure("ticks", procedure().stream(|_args| async { Ok(ChunkStream::from_chunks([1, 2])) })),
        )
}

#[tokio::test]
async fn test_resolves_leaves() {
    let router = sample();
    assert_eq!(call(&router, &["health"]).await, Value::from("health"));
    assert_eq!(call(&router, &["users", "get"]).await, Value::from("users.get"));
    assert_eq!(call(&router, &["admin", "stats"]).await, Value::from("admin.stats"));
    assert_eq!(
        router.resolve(&["admin", "ticks"]).unwrap().kind(),
        ProcedureKind::Stream
    );
}

#[test]
fn test_unresolvable_paths_are_not_found() {
    let router = sample();
    let cases: [&[&str]; 7] = [
        &[],
        &["users"],
        &["users", "delete"],
        &["health", "extra"],
        &["users", ""],
        &["", "health"],
        &["Health"],
    ];
    for path in cases {
        let err = router.resolve(path).unwrap_err();
        assert_eq!(err.code, RpcErrorCode::NotFound, "path {:?}", path);
    }
}

#[test]
fn test_not_found_names_the_path() {
    let err = sample().resolve(&["users", "delete"]).unwrap_err();
    assert!(err.message.contains("users.delete"));
}

#[test]
fn test_procedures_are_listed_sorted() {
    assert_eq!(
        sample().procedures(),
        vec!["admin.stats", "admin.ticks", "health", "users.get", "users.list"]
    );
}

#[tokio::test]
async fn test_merge_into_existing_namespace_keeps_both() {
    let router = Router::new()
        .procedure("users.get", named("get"))
        .merge("users", Router::new().procedure("create", named("create")));
    assert_eq!(call(&router, &["users", "get"]).await, Value::from("get"));
    assert_eq!(call(&router, &["users", "create"]).await, Value::from("create"));
}

#[test]
fn test_merge_at_root() {
    let router = Router::new().merge("", sample());
    assert_eq!(router.procedures().len(), 5);
    assert!(matches!(router.get("users"), Some(Node::Router(_))));
    assert!(matches!(router.get("health"), Some(Node::Procedure(_))));
}

#[tokio::test]
async fn test_last_registration_wins() {
    let router = Router::new()
        .procedure("ping", named("old"))
        .procedure("ping", named("new"));
    assert_eq!(router.len(), 1);
    assert_eq!(call(&router, &["ping"]).await, Value::from("new"));
}

#[test]
fn test_invalid_names_are_skipped() {
    let router = Router::new()
        .procedure("", named("empty"))
        .procedure("a..b", named("gap"))
        .procedure("with space", named("space"))
        .procedure("ok_name-1", named("ok"));
    assert_eq!(router.procedures(), vec!["ok_name-1"]);
}

#[test]
fn test_string_segments_resolve() {
    let router = sample();
    let path: Vec<String> = vec!["users".to_string(), "list".to_string()];
    assert!(router.resolve(&path).is_ok());
}

proptest! {
    /// Property: every registered dotted name resolves by its segments and is listed.
    #[test]
    fn prop_registered_names_resolve(
        names in prop::collection::btree_set("[a-c]{1,2}(\\.[a-c]{1,2}){0,2}", 1..8)
    ) {
        // A name that is a prefix of another becomes a router; keep only leaves.
        let leaves: Vec<String> = names
            .iter()
            .filter(|name| !names.iter().any(|other| other.starts_with(&format!("{}.", name))))
            .cloned()
            .collect();
        let router = leaves
            .iter()
            .fold(Router::new(), |router, name| router.procedure(name, named("leaf")));

        for name in &leaves {
            let segments: Vec<&str> = name.split('.').collect();
            prop_assert!(router.resolve(&segments).is_ok(), "{} did not resolve", name);
        }
        prop_assert_eq!(router.procedures(), leaves);
    }
}
