// src/metrics.rs
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub requests: AtomicUsize,
    pub not_found: AtomicUsize,
    pub method_not_allowed: AtomicUsize,
    pub failures: AtomicUsize,
    pub panics: AtomicUsize,
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterSnapshot {
    pub requests: usize,
    pub not_found: usize,
    pub method_not_allowed: usize,
    pub failures: usize,
    pub panics: usize,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_req(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_not_found(&self) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_method_not_allowed(&self) {
        self.method_not_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            method_not_allowed: self.method_not_allowed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Contexts created because the free list was empty.
    pub allocated: AtomicUsize,
    /// Acquisitions served from the free list.
    pub reused: AtomicUsize,
    /// Released contexts dropped because the free list was full.
    pub discarded: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub allocated: usize,
    pub reused: usize,
    pub discarded: usize,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_allocated(&self) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}
