// src/lib.rs
//! Request-dispatch core: a segment-based route tree, pooled per-request
//! contexts and onion-style middleware.
//!
//! ```rust
//! use etude_core::{Request, Router};
//!
//! let mut router = Router::new();
//! router.get("/users/:id", |ctx| {
//!     let id = ctx.param("id").unwrap_or_default().to_string();
//!     ctx.text(200, format!("user {id}"))
//! })?;
//!
//! let res = router.serve(Request::get("/users/42"));
//! assert_eq!(res.body_str(), Some("user 42"));
//! # Ok::<(), etude_core::ConfigError>(())
//! ```
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod pool;
pub mod router;
pub mod signal;
pub mod tree;

// Re-exports for users
pub use config::{Config, Mode};
pub use context::{Context, Params, Store};
pub use error::{ConfigError, Error, HandlerResult};
pub use http::{Method, Request, Response};
pub use pool::{ContextPool, PooledContext};
pub use router::{Group, Handler, Outcome, Resolved, Router, handler};
pub use signal::Signal;
pub use tree::{AllowedMethods, PathTree, Resolution, RouteTarget, SegmentKind};
