//! Per-request execution state.
//!
//! A [`Context`] owns the captured path parameters, the composed chain of
//! steps, a cursor into that chain and the request's [`Signal`]. The request
//! store and the request/response exchange live behind reference-counted
//! handles so a [`Context::derive`]d context shares them with its parent.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use crate::error::{Error, HandlerResult};
use crate::http::{Method, Request, Response};
use crate::router::Handler;
use crate::signal::Signal;

/// Captured path parameters, in capture order. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Binds `name`, replacing any earlier value for the same key.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn push(&mut self, name: &str, value: String) {
        self.entries.push((name.to_string(), value));
    }

    pub(crate) fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }
}

type Value = Arc<dyn Any + Send + Sync>;

/// Request-scoped key/value store.
///
/// Cloning yields another handle to the same map and lock, so a clone can be
/// moved into a background thread while the request continues. The lock is
/// held only for the duration of each map operation.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Value>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.lock().insert(key.into(), Arc::new(value));
    }

    /// Typed read. `None` when the key is missing or holds another type.
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        let value = self.lock().get(key).cloned()?;
        value.downcast::<V>().ok()
    }

    pub fn get_raw(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether both handles point at the same map.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Empties the map in place when this is the only handle; otherwise
    /// detaches onto a fresh map so outstanding handles keep the old data.
    pub(crate) fn reset(&mut self) {
        if Arc::get_mut(&mut self.inner).is_some() {
            self.lock().clear();
        } else {
            *self = Store::new();
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.lock().keys().cloned().collect();
        f.debug_struct("Store").field("keys", &keys).finish()
    }
}

/// The transport's request together with the response being built.
#[derive(Debug, Default)]
pub(crate) struct Exchange {
    pub(crate) request: Request,
    pub(crate) response: Mutex<Response>,
}

pub struct Context {
    pub(crate) exchange: Arc<Exchange>,
    pub(crate) store: Store,
    pub(crate) params: Params,
    pub(crate) chain: Vec<Handler>,
    /// Index of the next step to run; 0 is the "before first step" position.
    pub(crate) next: usize,
    pub(crate) aborted: bool,
    /// One-shot guard for committing the response.
    pub(crate) committed: bool,
    pub(crate) signal: Signal,
    pub(crate) allowed: Vec<Method>,
}

impl Context {
    pub(crate) fn new() -> Self {
        Self {
            exchange: Arc::new(Exchange::default()),
            store: Store::new(),
            params: Params::new(),
            chain: Vec::new(),
            next: 0,
            aborted: false,
            committed: false,
            signal: Signal::background(),
            allowed: Vec::new(),
        }
    }

    /// Runs the next step of the chain and returns its result. Past the end
    /// of the chain, or after [`abort`](Self::abort), this is a no-op.
    ///
    /// A middleware step decides where its own logic runs relative to the
    /// rest of the chain by when it calls `next`, and short-circuits by not
    /// calling it at all.
    pub fn next(&mut self) -> HandlerResult {
        if self.aborted {
            return Ok(());
        }
        let Some(step) = self.chain.get(self.next).cloned() else {
            return Ok(());
        };
        self.next += 1;
        step(self)
    }

    /// Skips every step that has not started yet.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Index of the step currently running, `None` before the first step.
    pub fn cursor(&self) -> Option<usize> {
        self.next.checked_sub(1)
    }

    pub fn chain_len(&self) -> usize {
        self.chain.len()
    }

    /// A context sharing this one's store, lock and exchange, with a
    /// snapshot of the parameters, chain and cursor, its own `signal` and its
    /// own response guard.
    pub fn derive(&self, signal: Signal) -> Context {
        Context {
            exchange: Arc::clone(&self.exchange),
            store: self.store.clone(),
            params: self.params.clone(),
            chain: self.chain.clone(),
            next: self.next,
            aborted: self.aborted,
            committed: false,
            signal,
            allowed: self.allowed.clone(),
        }
    }

    /// Folds a derived context's progress back so the steps it already ran
    /// are not run again from this context.
    pub fn rejoin(&mut self, derived: Context) {
        self.next = self.next.max(derived.next);
        self.aborted |= derived.aborted;
        self.committed |= derived.committed;
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn request(&self) -> &Request {
        &self.exchange.request
    }

    pub fn method(&self) -> Method {
        self.exchange.request.method
    }

    pub fn path(&self) -> &str {
        &self.exchange.request.path
    }

    /// Direct access to the response under construction. Prefer
    /// [`respond`](Self::respond) for committing a full response.
    pub fn response(&self) -> MutexGuard<'_, Response> {
        self.exchange
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Methods registered at the matched path; filled for
    /// method-not-allowed dispatch and for matched routes.
    pub fn allowed_methods(&self) -> &[Method] {
        &self.allowed
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.store.set(key, value);
    }

    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        self.store.get(key)
    }

    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Commits `response` unless a response was already committed through
    /// this context. Returns whether it was written.
    pub fn respond(&mut self, response: Response) -> bool {
        if self.committed {
            tracing::warn!(
                method = %self.method(),
                path = %self.path(),
                status = response.status,
                "superfluous response write ignored"
            );
            return false;
        }
        self.committed = true;
        *self.response() = response;
        true
    }

    /// Commits only the status code, keeping any body already set.
    pub fn set_status(&mut self, status: u16) -> bool {
        if self.committed {
            tracing::warn!(status, "superfluous status write ignored");
            return false;
        }
        self.committed = true;
        self.response().status = status;
        true
    }

    pub fn text(&mut self, status: u16, body: impl Into<Vec<u8>>) -> HandlerResult {
        self.respond(Response::text(status, body));
        Ok(())
    }

    pub fn json<T: Serialize>(&mut self, status: u16, val: &T) -> HandlerResult {
        let response = Response::json(status, val).map_err(Error::from)?;
        self.respond(response);
        Ok(())
    }

    /// Commits `status` and skips the rest of the chain.
    pub fn abort_with_status(&mut self, status: u16) {
        self.respond(Response::new(status));
        self.abort();
    }

    /// Prepares a recycled or fresh context for a new request.
    pub(crate) fn attach(&mut self, request: Request, signal: Signal) {
        match Arc::get_mut(&mut self.exchange) {
            Some(exchange) => exchange.request = request,
            None => {
                self.exchange = Arc::new(Exchange {
                    request,
                    response: Mutex::new(Response::default()),
                })
            }
        }
        self.signal = signal;
    }

    /// Clears every trace of the previous request while keeping allocations.
    pub(crate) fn reset(&mut self) {
        self.params.clear();
        self.chain.clear();
        self.allowed.clear();
        self.next = 0;
        self.aborted = false;
        self.committed = false;
        // Detach from the previous request's parent token.
        self.signal = Signal::background();
        self.store.reset();
        match Arc::get_mut(&mut self.exchange) {
            Some(exchange) => {
                exchange.request = Request::default();
                exchange
                    .response
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clear();
            }
            None => self.exchange = Arc::new(Exchange::default()),
        }
    }

    /// Moves the response out, leaving an empty one behind.
    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::take(&mut *self.response())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.exchange.request.method)
            .field("path", &self.exchange.request.path)
            .field("params", &self.params)
            .field("chain_len", &self.chain.len())
            .field("next", &self.next)
            .field("aborted", &self.aborted)
            .field("committed", &self.committed)
            .finish()
    }
}
