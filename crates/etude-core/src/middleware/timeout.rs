use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, HandlerResult};

/// Runs the rest of the chain under a signal that expires after `limit`.
///
/// Handlers see the narrower deadline through [`Context::signal`]. Nothing is
/// interrupted; if the chain returns after the deadline has passed the step
/// reports [`Error::DeadlineExceeded`].
pub fn timeout(limit: Duration) -> impl Fn(&mut Context) -> HandlerResult + Send + Sync + 'static {
    move |ctx: &mut Context| {
        ctx.signal().check()?;
        let signal = ctx.signal().with_timeout(limit);
        let mut derived = ctx.derive(signal.clone());
        let result = derived.next();
        ctx.rejoin(derived);
        result?;

        if signal.is_expired() {
            tracing::debug!(
                method = %ctx.method(),
                path = %ctx.path(),
                limit_ms = limit.as_millis() as u64,
                "deadline exceeded"
            );
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }
}
