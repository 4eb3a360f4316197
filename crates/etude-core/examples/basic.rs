// examples/basic.rs
use std::sync::Arc;
use std::time::Duration;

use etude_core::middleware::{InMemoryBackend, logger, rate_limit, timeout};
use etude_core::{Config, Error, Request, Router, logging};
use serde::Serialize;

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    logging::init_from_config(&config)?;

    let mut router = Router::with_config(config);
    router.wrap(logger());
    router.wrap(timeout(Duration::from_secs(2)));

    router.get("/", |ctx| ctx.text(200, "Hello, World!"))?;
    router.get("/static/*filepath", |ctx| {
        let file = ctx.param("filepath").unwrap_or_default().to_string();
        ctx.text(200, format!("serving {file}"))
    })?;

    {
        let limiter = Arc::new(InMemoryBackend::new());
        let mut api = router.group("/api");
        api.wrap(rate_limit(limiter, 3, Duration::from_secs(60), |ctx| {
            ctx.request()
                .get_header("X-Client")
                .unwrap_or("anonymous")
                .to_string()
        }));
        api.get("/users/:id", |ctx| {
            let id: u64 = ctx
                .param("id")
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(|| Error::BadRequest("id must be a number".into()))?;
            ctx.json(
                200,
                &User {
                    id,
                    name: format!("user-{id}"),
                },
            )
        })?;
    }

    for target in [
        "/",
        "/static/css/app.css",
        "/api/users/7",
        "/api/users/abc",
        "/api/users/8",
        "/api/users/9",
        "/missing",
    ] {
        let res = router.serve(Request::get(target));
        println!(
            "GET {target:<22} -> {} {}",
            res.status,
            res.body_str().unwrap_or("<binary>")
        );
    }
    println!("{:?}", router.metrics());
    Ok(())
}
