use std::time::Instant;

use crate::context::Context;
use crate::error::HandlerResult;

/// Logs one `info` event per request once the rest of the chain returns.
pub fn logger() -> impl Fn(&mut Context) -> HandlerResult + Send + Sync + 'static {
    |ctx: &mut Context| {
        let start = Instant::now();
        let result = ctx.next();
        let elapsed_us = start.elapsed().as_micros() as u64;

        match &result {
            Ok(()) => {
                let status = ctx.response().status;
                tracing::info!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    status,
                    elapsed_us,
                    "request"
                );
            }
            Err(err) => {
                tracing::warn!(
                    method = %ctx.method(),
                    path = %ctx.path(),
                    status = err.status_code(),
                    code = err.error_code(),
                    elapsed_us,
                    "request failed"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Request, Router};

    #[test]
    fn test_logger_is_transparent() {
        let mut router = Router::new();
        router.wrap(logger());
        router.get("/", |ctx| ctx.text(200, "ok")).unwrap();

        let res = router.serve(Request::get("/"));
        assert_eq!(res.status, 200);
        assert_eq!(res.body_str(), Some("ok"));
    }
}
