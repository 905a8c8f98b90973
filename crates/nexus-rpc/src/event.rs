//! The request event seen by middleware and handlers
//!
//! A [`RequestEvent`] wraps one inbound request and the capabilities procedures may use to
//! affect the outside world: a [`CookieJar`] whose mutations are flushed into the response,
//! [`Locals`] shared with the host application, and a [`CancellationSignal`] that fires when the
//! client goes away. Clones share all of it; the event is cheap to pass around.

use crate::error::{RpcError, RpcResult};
use chrono::{DateTime, Utc};
use cookie::{Cookie, SameSite};
use http::{HeaderMap, Method, Uri};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::Notify;
use tracing::trace;

// =============================================================================
// Cancellation
// =============================================================================

/// One-shot signal raised when a request is abandoned.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            trace!("Request cancelled");
        }
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wait until the signal is raised.
    pub async fn cancelled(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Cancels its signal when dropped unless disarmed.
#[derive(Debug)]
pub(crate) struct CancelOnDrop {
    signal: Arc<CancellationSignal>,
    armed: bool,
}

impl CancelOnDrop {
    pub(crate) fn new(signal: Arc<CancellationSignal>) -> Self {
        Self {
            signal,
            armed: true,
        }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.signal.cancel();
        }
    }
}

// =============================================================================
// Cookies
// =============================================================================

/// Attributes of a cookie set by a procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieOptions {
    pub path: String,
    pub domain: Option<String>,
    /// Lifetime in seconds
    pub max_age: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            max_age: None,
            expires: None,
            http_only: true,
            secure: true,
            same_site: Some(SameSite::Lax),
        }
    }
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: Option<SameSite>) -> Self {
        self.same_site = same_site;
        self
    }
}

/// A queued `Set-Cookie`.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieMutation {
    pub name: String,
    pub value: String,
    pub options: CookieOptions,
    /// Deletion rather than assignment
    pub removal: bool,
}

impl CookieMutation {
    /// Render as a `Set-Cookie` header value.
    pub fn to_header_value(&self) -> String {
        let mut cookie = Cookie::build((self.name.clone(), self.value.clone()))
            .path(self.options.path.clone())
            .http_only(self.options.http_only)
            .secure(self.options.secure)
            .build();
        if let Some(domain) = &self.options.domain {
            cookie.set_domain(domain.clone());
        }
        if let Some(same_site) = self.options.same_site {
            cookie.set_same_site(same_site);
        }
        if let Some(seconds) = self.options.max_age {
            cookie.set_max_age(cookie::time::Duration::seconds(seconds));
        }
        if let Some(expires) = self.options.expires
            && let Ok(at) = cookie::time::OffsetDateTime::from_unix_timestamp(expires.timestamp())
        {
            cookie.set_expires(cookie::Expiration::DateTime(at));
        }
        if self.removal {
            cookie.make_removal();
        }
        cookie.to_string()
    }
}

/// Incoming cookies plus the mutations a call queues.
///
/// Mutations are not written until the response is built, and are dropped if the call fails.
/// Reads see queued mutations, so a procedure reading a cookie it just set gets the new value.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    incoming: Arc<HashMap<String, String>>,
    mutations: Arc<Mutex<Vec<CookieMutation>>>,
}

impl CookieJar {
    /// Parse the request's `Cookie` headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let incoming = headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|header| Cookie::split_parse(header.to_string()))
            .filter_map(Result::ok)
            .map(|cookie| (cookie.name().to_string(), cookie.value().to_string()))
            .collect();
        Self {
            incoming: Arc::new(incoming),
            mutations: Arc::default(),
        }
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, Vec<CookieMutation>> {
        self.mutations.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current value, including mutations queued by this call.
    pub fn get(&self, name: &str) -> Option<String> {
        let queued = self
            .queue()
            .iter()
            .rev()
            .find(|m| m.name == name)
            .map(|m| (!m.removal).then(|| m.value.clone()));
        match queued {
            Some(value) => value,
            None => self.incoming.get(name).cloned(),
        }
    }

    /// Incoming cookies, as sent by the client.
    pub fn get_all(&self) -> Vec<(String, String)> {
        let mut all: Vec<_> = self
            .incoming
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort();
        all
    }

    /// Queue a cookie assignment.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>, options: CookieOptions) {
        let name = name.into();
        trace!(cookie = %name, "Queued cookie");
        self.queue().push(CookieMutation {
            name,
            value: value.into(),
            options,
            removal: false,
        });
    }

    /// Queue a cookie deletion.
    pub fn delete(&self, name: impl Into<String>, options: CookieOptions) {
        let name = name.into();
        trace!(cookie = %name, "Queued cookie deletion");
        self.queue().push(CookieMutation {
            name,
            value: String::new(),
            options,
            removal: true,
        });
    }

    /// Mutations queued so far, in order.
    pub fn pending(&self) -> Vec<CookieMutation> {
        self.queue().clone()
    }

    /// Remove and return the queued mutations.
    pub fn take_mutations(&self) -> Vec<CookieMutation> {
        std::mem::take(&mut *self.queue())
    }
}

// =============================================================================
// Locals
// =============================================================================

/// Request-scoped values shared between the host application and procedures.
#[derive(Clone, Default)]
pub struct Locals {
    entries: Arc<RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl Locals {
    pub fn insert<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.into(), Arc::new(value));
    }

    /// Typed lookup.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let entry = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .is_some()
    }
}

impl std::fmt::Debug for Locals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<_> = entries.keys().collect();
        keys.sort();
        f.debug_struct("Locals").field("keys", &keys).finish()
    }
}

// =============================================================================
// Request Event
// =============================================================================

#[derive(Debug)]
struct EventInner {
    request_id: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    cookies: CookieJar,
    locals: Locals,
    signal: Arc<CancellationSignal>,
}

/// One inbound request and its side-effect capabilities.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    inner: Arc<EventInner>,
}

impl RequestEvent {
    /// Build an event for a request.
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            inner: Arc::new(EventInner {
                request_id: crate::logging::generate_request_id(),
                cookies: CookieJar::from_headers(&headers),
                method,
                uri,
                headers,
                locals: Locals::default(),
                signal: Arc::new(CancellationSignal::new()),
            }),
        }
    }

    pub fn from_parts(parts: &http::request::Parts) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone(), parts.headers.clone())
    }

    /// An event with no inbound request, for calls made outside HTTP.
    pub fn detached() -> Self {
        Self::new(Method::POST, Uri::from_static("/"), HeaderMap::new())
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// Header value as text, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.inner.cookies
    }

    pub fn locals(&self) -> &Locals {
        &self.inner.locals
    }

    pub fn signal(&self) -> &Arc<CancellationSignal> {
        &self.inner.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.signal.is_cancelled()
    }

    /// Wait until the client abandons the request.
    pub async fn cancelled(&self) {
        self.inner.signal.cancelled().await
    }

    /// Fail with `CLIENT_CLOSED_REQUEST` once the request is abandoned.
    pub fn ensure_active(&self) -> RpcResult<()> {
        if self.is_cancelled() {
            Err(RpcError::from_code(
                crate::error::RpcErrorCode::ClientClosedRequest,
            ))
        } else {
            Ok(())
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRequestEvent {
        WeakRequestEvent {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning handle to an event, held by values stored in the event's own locals.
#[derive(Debug, Clone)]
pub(crate) struct WeakRequestEvent {
    inner: Weak<EventInner>,
}

impl WeakRequestEvent {
    pub(crate) fn upgrade(&self) -> Option<RequestEvent> {
        self.inner.upgrade().map(|inner| RequestEvent { inner })
    }
}
