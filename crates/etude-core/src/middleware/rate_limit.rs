use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::error::{Error, HandlerResult};
use crate::http::Response;

/// The verdict for one request against a key's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Requests counted in the current window, this one included.
    pub current: u64,
    pub limit: u64,
    pub window_end: Instant,
}

impl Decision {
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.current)
    }

    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after(&self) -> u64 {
        self.window_end
            .saturating_duration_since(Instant::now())
            .as_secs()
            .max(1)
    }
}

/// Pluggable counter store for [`rate_limit`].
pub trait RateLimitBackend: Send + Sync {
    /// Counts one request for `key` and decides whether it fits within
    /// `limit` requests per `window`.
    fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<Decision, Error>;

    /// Releases backend resources. Later calls to `allow` may fail.
    fn close(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u64,
}

/// In-memory fixed-window counters. Suitable for a single process.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    windows: Mutex<HashMap<String, Window>>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops windows that ended more than `window` ago.
    /// Call periodically to bound memory.
    pub fn cleanup(&self, window: Duration) {
        let now = Instant::now();
        let mut map = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, w| now.duration_since(w.start) < window);
    }

    pub fn len(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimitBackend for InMemoryBackend {
    fn allow(&self, key: &str, limit: u64, window: Duration) -> Result<Decision, Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Backend("in-memory backend is closed".into()));
        }
        let now = Instant::now();
        let mut map = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = map.entry(key.to_string()).or_insert(Window {
            start: now,
            count: 0,
        });
        if now.duration_since(entry.start) >= window {
            entry.start = now;
            entry.count = 0;
        }
        entry.count += 1;

        Ok(Decision {
            allowed: entry.count <= limit,
            current: entry.count,
            limit,
            window_end: entry.start + window,
        })
    }

    fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

fn limit_headers(response: &mut Response, decision: &Decision) {
    response
        .headers
        .push(("X-RateLimit-Limit", decision.limit.to_string()));
    response
        .headers
        .push(("X-RateLimit-Remaining", decision.remaining().to_string()));
    response
        .headers
        .push(("X-RateLimit-Reset", decision.retry_after().to_string()));
}

/// Limits requests to `limit` per `window` for each key `key_fn` extracts.
///
/// A denied request gets a committed 429 with a `Retry-After` header, the
/// rest of the chain is skipped and the step reports
/// [`Error::TooManyRequests`]. A backend failure is logged and the request is
/// let through.
pub fn rate_limit<B, K>(
    backend: Arc<B>,
    limit: u64,
    window: Duration,
    key_fn: K,
) -> impl Fn(&mut Context) -> HandlerResult + Send + Sync + 'static
where
    B: RateLimitBackend + ?Sized + 'static,
    K: Fn(&Context) -> String + Send + Sync + 'static,
{
    move |ctx: &mut Context| {
        let key = key_fn(ctx);
        let decision = match backend.allow(&key, limit, window) {
            Ok(decision) => decision,
            Err(err) => {
                tracing::warn!(%key, error = %err, "rate limit backend failed, allowing request");
                return ctx.next();
            }
        };

        if !decision.allowed {
            tracing::debug!(%key, current = decision.current, limit, "rate limited");
            let retry_after = decision.retry_after();
            let mut response = Response::text(429, "Too Many Requests")
                .header("Retry-After", retry_after.to_string());
            limit_headers(&mut response, &decision);
            ctx.respond(response);
            ctx.abort();
            return Err(Error::TooManyRequests { retry_after });
        }

        let result = ctx.next();
        limit_headers(&mut ctx.response(), &decision);
        result
    }
}
