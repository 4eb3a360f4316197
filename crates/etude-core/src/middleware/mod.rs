//! Built-in middleware.
//!
//! Each constructor returns a closure with the handler shape, ready for
//! [`Router::wrap`](crate::Router::wrap), [`Group::wrap`](crate::Group::wrap)
//! or, boxed with [`handler`](crate::handler), a route's middleware list.

pub mod logger;
pub mod rate_limit;
pub mod timeout;

pub use logger::logger;
pub use rate_limit::{Decision, InMemoryBackend, RateLimitBackend, rate_limit};
pub use timeout::timeout;
