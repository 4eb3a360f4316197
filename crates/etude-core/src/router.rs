// src/router.rs
//! Route registration and request dispatch.
//!
//! Setup happens through `&mut Router`; serving through `&Router`, so once a
//! router is shared (e.g. behind an `Arc`) the route table can no longer
//! change.

use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::error::{ConfigError, Error, HandlerResult};
use crate::http::{Method, Request, Response};
use crate::metrics::{RouterMetrics, RouterSnapshot};
use crate::pool::ContextPool;
use crate::signal::Signal;
use crate::tree::{PathTree, Resolution};

/// A handler or middleware step.
///
/// Middleware has the same shape as a handler; it continues the chain by
/// calling [`Context::next`] and may run code before and after that call.
pub type Handler = Arc<dyn Fn(&mut Context) -> HandlerResult + Send + Sync>;

/// Boxes a closure or function into a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// How a dispatched request was resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Matched,
    NotFound,
    /// Carries the methods registered at the path, for an `Allow` header.
    MethodNotAllowed(Vec<Method>),
}

/// Everything the transport needs after a request has been dispatched.
#[derive(Debug)]
pub struct Outcome {
    pub resolved: Resolved,
    pub result: HandlerResult,
    pub response: Response,
    /// Whether a step committed the response.
    pub committed: bool,
}

fn default_not_found(ctx: &mut Context) -> HandlerResult {
    ctx.respond(Response::not_found());
    Ok(())
}

fn default_method_not_allowed(ctx: &mut Context) -> HandlerResult {
    let response = Response::method_not_allowed(ctx.allowed_methods());
    ctx.respond(response);
    Ok(())
}

pub struct Router {
    tree: PathTree,
    middleware: Vec<Handler>,
    not_found: Handler,
    method_not_allowed: Handler,
    pool: ContextPool,
    config: Arc<Config>,
    metrics: RouterMetrics,
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            tree: PathTree::new(),
            middleware: Vec::new(),
            not_found: Arc::new(default_not_found),
            method_not_allowed: Arc::new(default_method_not_allowed),
            pool: ContextPool::new(config.pool_max_idle),
            config: Arc::new(config),
            metrics: RouterMetrics::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a route with explicit route-local middleware.
    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        middleware: Vec<Handler>,
    ) -> Result<(), ConfigError> {
        let steps = middleware.len() + 1;
        self.tree.add(method, pattern, handler, middleware)?;
        if self.config.is_debug() {
            tracing::debug!(%method, pattern, steps, "route registered");
        }
        Ok(())
    }

    pub fn route<F>(&mut self, method: Method, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(method, pattern, Arc::new(f), Vec::new())
    }

    // Convenience methods
    pub fn get<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Get, pattern, f)
    }

    pub fn post<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Post, pattern, f)
    }

    pub fn put<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Put, pattern, f)
    }

    pub fn patch<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Patch, pattern, f)
    }

    pub fn delete<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Delete, pattern, f)
    }

    pub fn head<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Head, pattern, f)
    }

    pub fn options<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Options, pattern, f)
    }

    /// Adds global middleware, run for every request in registration order.
    pub fn wrap<F>(&mut self, f: F)
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(f));
    }

    /// Replaces the handler run (behind global middleware) when no route
    /// matches.
    pub fn not_found<F>(&mut self, f: F)
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.not_found = Arc::new(f);
    }

    /// Replaces the handler run when the path exists under other methods.
    /// [`Context::allowed_methods`] lists them.
    pub fn method_not_allowed<F>(&mut self, f: F)
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.method_not_allowed = Arc::new(f);
    }

    /// Starts a group of routes sharing `prefix` and group middleware.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            router: self,
            prefix: trim_prefix(prefix),
            middleware: Vec::new(),
        }
    }

    pub fn routes(&self) -> Vec<(Method, String)> {
        self.tree.routes()
    }

    pub fn tree(&self) -> &PathTree {
        &self.tree
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn metrics(&self) -> RouterSnapshot {
        self.metrics.snapshot()
    }

    /// Resolves and runs one request.
    ///
    /// The context is acquired from the pool, driven by a single call to
    /// [`Context::next`], and released before this returns, whatever the
    /// chain's outcome.
    pub fn dispatch(&self, request: Request, parent: Option<&Signal>) -> Outcome {
        self.metrics.inc_req();
        let method = request.method;
        let mut guard = self.pool.acquire(request, parent);
        let ctx: &mut Context = &mut guard;

        let resolution = self
            .tree
            .find_into(method, &ctx.exchange.request.path, &mut ctx.params);
        ctx.chain.extend(self.middleware.iter().cloned());

        let resolved = match resolution {
            Resolution::Matched { target, allowed } => {
                ctx.allowed.extend(allowed.iter());
                ctx.chain.extend(target.middleware.iter().cloned());
                ctx.chain.push(Arc::clone(&target.handler));
                Resolved::Matched
            }
            Resolution::MethodNotAllowed(allowed) if self.config.handle_method_not_allowed => {
                self.metrics.inc_method_not_allowed();
                ctx.allowed.extend(allowed.iter());
                ctx.chain.push(Arc::clone(&self.method_not_allowed));
                Resolved::MethodNotAllowed(allowed.to_vec())
            }
            Resolution::MethodNotAllowed(_) | Resolution::NotFound => {
                self.metrics.inc_not_found();
                ctx.params.clear();
                ctx.chain.push(Arc::clone(&self.not_found));
                Resolved::NotFound
            }
        };
        tracing::trace!(
            %method,
            path = %ctx.path(),
            steps = ctx.chain.len(),
            ?resolved,
            "dispatching"
        );

        let result = self.run(ctx);
        if let Err(err) = &result {
            self.metrics.inc_failure();
            tracing::debug!(%method, path = %ctx.path(), error = %err, "request failed");
        }
        let committed = ctx.is_committed();
        let response = ctx.take_response();
        guard.release();

        Outcome {
            resolved,
            result,
            response,
            committed,
        }
    }

    /// Dispatches without a parent signal and turns an unhandled failure into
    /// an error response.
    pub fn serve(&self, request: Request) -> Response {
        let outcome = self.dispatch(request, None);
        match outcome.result {
            Err(err) if !outcome.committed => Response::text(err.status_code(), err.to_string()),
            _ => outcome.response,
        }
    }

    #[cfg(feature = "catch-panic")]
    fn run(&self, ctx: &mut Context) -> HandlerResult {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| ctx.next()));
        match result {
            Ok(r) => r,
            Err(payload) => {
                self.metrics.inc_panic();
                let message = panic_message(payload.as_ref());
                tracing::error!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    %message,
                    "handler panicked"
                );
                Err(Error::Panic(message))
            }
        }
    }

    #[cfg(not(feature = "catch-panic"))]
    fn run(&self, ctx: &mut Context) -> HandlerResult {
        ctx.next()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.tree.len())
            .field("middleware", &self.middleware.len())
            .field("pool", &self.pool)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(feature = "catch-panic")]
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn trim_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

/// Routes registered under a shared prefix and group middleware.
///
/// Group middleware runs after global middleware and before route-local
/// middleware.
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<Handler>,
}

impl Group<'_> {
    pub fn wrap<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.middleware.push(Arc::new(f));
        self
    }

    pub fn add(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        middleware: Vec<Handler>,
    ) -> Result<(), ConfigError> {
        if !pattern.starts_with('/') {
            return Err(ConfigError::MissingLeadingSlash(pattern.to_string()));
        }
        let full = if pattern == "/" && !self.prefix.is_empty() {
            self.prefix.clone()
        } else {
            format!("{}{}", self.prefix, pattern)
        };
        let mut steps = self.middleware.clone();
        steps.extend(middleware);
        self.router.add(method, &full, handler, steps)
    }

    pub fn route<F>(&mut self, method: Method, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.add(method, pattern, Arc::new(f), Vec::new())
    }

    pub fn get<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Get, pattern, f)
    }

    pub fn post<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Post, pattern, f)
    }

    pub fn put<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Put, pattern, f)
    }

    pub fn patch<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Patch, pattern, f)
    }

    pub fn delete<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Delete, pattern, f)
    }

    pub fn head<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Head, pattern, f)
    }

    pub fn options<F>(&mut self, pattern: &str, f: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Context) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::Options, pattern, f)
    }

    /// A nested group inheriting this group's prefix and middleware.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: format!("{}{}", self.prefix, trim_prefix(prefix)),
            middleware: self.middleware.clone(),
            router: &mut *self.router,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_path(ctx: &mut Context) -> HandlerResult {
        let body = ctx.path().to_string();
        ctx.text(200, body)
    }

    #[test]
    fn test_router_static() {
        let mut router = Router::new();
        router.get("/hello/world", echo_path).unwrap();

        let res = router.serve(Request::get("/hello/world"));
        assert_eq!(res.status, 200);
        assert_eq!(res.body_str(), Some("/hello/world"));
        assert_eq!(router.serve(Request::get("/hello")).status, 404);
    }

    #[test]
    fn test_router_params() {
        let mut router = Router::new();
        router
            .get("/echo/:msg", |ctx| {
                let msg = ctx.param("msg").unwrap_or("missing").to_string();
                ctx.text(200, format!("Echo: {msg}"))
            })
            .unwrap();

        let res = router.serve(Request::get("/echo/integration_test"));
        assert_eq!(res.body_str(), Some("Echo: integration_test"));
    }

    #[test]
    fn test_method_not_allowed_sets_allow() {
        let mut router = Router::new();
        router.get("/ping", echo_path).unwrap();
        router.put("/ping", echo_path).unwrap();

        let outcome = router.dispatch(Request::post("/ping"), None);
        assert_eq!(
            outcome.resolved,
            Resolved::MethodNotAllowed(vec![Method::Get, Method::Put])
        );
        assert_eq!(outcome.response.status, 405);
        assert_eq!(outcome.response.get_header("Allow"), Some("GET, PUT"));
    }

    #[test]
    fn test_method_not_allowed_disabled() {
        let config = Config {
            handle_method_not_allowed: false,
            ..Config::default()
        };
        let mut router = Router::with_config(config);
        router.get("/ping", echo_path).unwrap();

        let outcome = router.dispatch(Request::post("/ping"), None);
        assert_eq!(outcome.resolved, Resolved::NotFound);
        assert_eq!(outcome.response.status, 404);
    }

    #[test]
    fn test_group_prefix_and_root() {
        let mut router = Router::new();
        {
            let mut api = router.group("/api/");
            api.get("/", echo_path).unwrap();
            api.get("/users", echo_path).unwrap();
            let mut v2 = api.group("/v2");
            v2.get("/users/:id", echo_path).unwrap();
        }
        let routes: Vec<String> = router.routes().into_iter().map(|(_, p)| p).collect();
        assert_eq!(routes, ["/api", "/api/users", "/api/v2/users/:id"]);
    }

    #[test]
    fn test_group_verb_helpers() {
        let mut router = Router::new();
        {
            let mut api = router.group("/api");
            api.get("/item", echo_path).unwrap();
            api.post("/item", echo_path).unwrap();
            api.put("/item", echo_path).unwrap();
            api.patch("/item", echo_path).unwrap();
            api.delete("/item", echo_path).unwrap();
            api.head("/item", echo_path).unwrap();
            api.options("/item", echo_path).unwrap();
        }
        let methods: Vec<Method> = router.routes().into_iter().map(|(m, _)| m).collect();
        assert_eq!(
            methods,
            [
                Method::Delete,
                Method::Get,
                Method::Head,
                Method::Options,
                Method::Patch,
                Method::Post,
                Method::Put,
            ]
        );
        let res = router.serve(Request::new(Method::Patch, "/api/item"));
        assert_eq!(res.body_str(), Some("/api/item"));
    }

    #[test]
    fn test_group_rejects_relative_pattern() {
        let mut router = Router::new();
        let mut api = router.group("/api");
        assert_eq!(
            api.get("users", echo_path),
            Err(ConfigError::MissingLeadingSlash("users".into()))
        );
    }

    #[test]
    fn test_error_becomes_response() {
        let mut router = Router::new();
        router
            .get("/secret", |_| Err(Error::Unauthorized("no token".into())))
            .unwrap();
        let res = router.serve(Request::get("/secret"));
        assert_eq!(res.status, 401);
    }

    #[cfg(feature = "catch-panic")]
    #[test]
    fn test_panic_is_caught_and_context_released() {
        let mut router = Router::new();
        router.get("/boom", |_| panic!("kaboom")).unwrap();

        let outcome = router.dispatch(Request::get("/boom"), None);
        assert!(matches!(outcome.result, Err(Error::Panic(ref m)) if m == "kaboom"));
        assert_eq!(router.pool().idle(), 1);
        assert_eq!(router.metrics().panics, 1);
    }
}
