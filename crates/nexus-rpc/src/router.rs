//! Router implementation with builder pattern
//!
//! A [`Router`] is a tree: leaves are procedures, inner nodes map a segment name to a
//! sub-router. Dotted procedure names create the intermediate routers.
//!
//! ```rust,ignore
//! let router = Router::new()
//!     .procedure("health", health)
//!     .procedure("users.get", get_user)
//!     .merge("admin", admin_router());
//!
//! let p = router.resolve(&["users", "get"])?;
//! ```
//!
//! Resolution is exact: segments are case-sensitive, there are no wildcards, and a path that
//! stops on a sub-router does not resolve.

use crate::error::{RpcError, RpcResult};
use crate::procedure::Procedure;
use crate::validation::validate_path;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One entry of a router.
#[derive(Debug, Clone)]
pub enum Node {
    Procedure(Arc<Procedure>),
    Router(Router),
}

/// Tree of procedures addressed by path.
#[derive(Debug, Clone, Default)]
pub struct Router {
    nodes: BTreeMap<String, Node>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `procedure` under a dotted `name`.
    ///
    /// Registering a name twice keeps the last registration. An invalid name is logged and
    /// skipped.
    #[must_use]
    pub fn procedure(mut self, name: &str, procedure: Procedure) -> Self {
        if let Err(e) = validate_path(name) {
            warn!(path = %name, error = %e.message, "Skipping procedure with invalid path");
            return self;
        }
        let segments: Vec<&str> = name.split('.').collect();
        self.insert(&segments, Node::Procedure(Arc::new(procedure)));
        self
    }

    /// Mount `router` under a dotted namespace.
    #[must_use]
    pub fn merge(mut self, namespace: &str, router: Router) -> Self {
        if namespace.is_empty() {
            self.nodes.extend(router.nodes);
            return self;
        }
        if let Err(e) = validate_path(namespace) {
            warn!(namespace = %namespace, error = %e.message, "Skipping router with invalid namespace");
            return self;
        }
        let segments: Vec<&str> = namespace.split('.').collect();
        self.insert(&segments, Node::Router(router));
        self
    }

    fn insert(&mut self, segments: &[&str], node: Node) {
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut current = self;
        for segment in parents {
            let entry = current
                .nodes
                .entry(segment.to_string())
                .or_insert_with(|| Node::Router(Router::new()));
            if let Node::Procedure(_) = entry {
                debug!(segment = %segment, "Replacing procedure with a sub-router");
                *entry = Node::Router(Router::new());
            }
            current = match entry {
                Node::Router(router) => router,
                Node::Procedure(_) => return,
            };
        }
        match node {
            Node::Router(incoming) => {
                if let Some(Node::Router(existing)) = current.nodes.get_mut(*last) {
                    existing.nodes.extend(incoming.nodes);
                } else {
                    current.nodes.insert(last.to_string(), Node::Router(incoming));
                }
            }
            node => {
                current.nodes.insert(last.to_string(), node);
            }
        }
    }

    /// Find the procedure at `path`.
    pub fn resolve<S: AsRef<str>>(&self, path: &[S]) -> RpcResult<Arc<Procedure>> {
        let joined = || {
            path.iter()
                .map(AsRef::as_ref)
                .collect::<Vec<_>>()
                .join(".")
        };
        let mut current = self;
        let mut segments = path.iter().map(AsRef::as_ref).peekable();
        while let Some(segment) = segments.next() {
            let node = (!segment.is_empty())
                .then(|| current.nodes.get(segment))
                .flatten();
            match node {
                Some(Node::Procedure(p)) if segments.peek().is_none() => {
                    trace!(path = %joined(), "Resolved procedure");
                    return Ok(p.clone());
                }
                Some(Node::Router(router)) => current = router,
                _ => break,
            }
        }
        debug!(path = %joined(), "Procedure not found");
        Err(RpcError::procedure_not_found(&joined()))
    }

    /// Dotted paths of every procedure, sorted.
    pub fn procedures(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect("", &mut paths);
        paths
    }

    fn collect(&self, prefix: &str, out: &mut Vec<String>) {
        for (name, node) in &self.nodes {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            match node {
                Node::Procedure(_) => out.push(path),
                Node::Router(router) => router.collect(&path, out),
            }
        }
    }

    pub fn get(&self, segment: &str) -> Option<&Node> {
        self.nodes.get(segment)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
