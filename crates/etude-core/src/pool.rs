// src/pool.rs
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use crate::context::Context;
use crate::http::Request;
use crate::metrics::{PoolMetrics, PoolSnapshot};
use crate::signal::Signal;

/// Free list of idle [`Context`]s.
///
/// Every context is reset before it goes back on the list, so a recycled
/// context never carries data from the request that used it last.
pub struct ContextPool {
    free: Mutex<Vec<Context>>,
    max_idle: usize,
    metrics: PoolMetrics,
}

impl ContextPool {
    /// Keeps at most `max_idle` idle contexts around.
    pub fn new(max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_idle.min(1024))),
            max_idle,
            metrics: PoolMetrics::new(),
        }
    }

    /// Checks out a context for `request`.
    ///
    /// The context's signal is a child of `parent` when one is supplied,
    /// otherwise a fresh root. The returned guard releases the context when
    /// dropped, including during unwinding.
    pub fn acquire(&self, request: Request, parent: Option<&Signal>) -> PooledContext<'_> {
        let recycled = self.free.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut ctx = match recycled {
            Some(ctx) => {
                self.metrics.inc_reused();
                ctx
            }
            None => {
                self.metrics.inc_allocated();
                Context::new()
            }
        };
        let signal = parent.map_or_else(Signal::background, Signal::child);
        ctx.attach(request, signal);
        PooledContext {
            ctx: Some(ctx),
            pool: self,
        }
    }

    /// Resets `ctx` and returns it to the free list.
    pub fn release(&self, mut ctx: Context) {
        ctx.reset();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_idle {
            free.push(ctx);
        } else {
            drop(free);
            self.metrics.inc_discarded();
        }
    }

    /// Number of idle contexts on the free list.
    pub fn idle(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn max_idle(&self) -> usize {
        self.max_idle
    }

    pub fn metrics(&self) -> PoolSnapshot {
        self.metrics.snapshot()
    }
}

impl Default for ContextPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_POOL_MAX_IDLE)
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// A checked-out context. Dropping it releases the context to its pool.
pub struct PooledContext<'p> {
    ctx: Option<Context>,
    pool: &'p ContextPool,
}

impl PooledContext<'_> {
    /// Releases now instead of at scope end.
    pub fn release(mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        // Only `release` and `drop` take the context, and both consume the guard.
        self.ctx.as_ref().unwrap_or_else(|| unreachable!("pooled context already released"))
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_mut().unwrap_or_else(|| unreachable!("pooled context already released"))
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}
