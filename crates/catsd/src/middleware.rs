//! Middleware chain composition and the default error handler.
//!
//! The reference implementation folds registered middleware with
//! `functools.partial(md, forward=runner)`, which makes the *last*
//! registered middleware the outermost wrapper. This implementation
//! composes in the opposite order on purpose: **the first middleware in
//! the configured list is outermost**, so registration order reads the same
//! as call order (`middlewares[0]` sees the request first and the response
//! last).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cats_codec::codec::{EncodeInput, Payload};
use cats_core::Headers;

use crate::connection::ConnectionHandle;
use crate::dispatch::{DispatchError, HandlerOutcome};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The terminal (or next-in-chain) callable a middleware wraps.
pub type Forward = Arc<
    dyn Fn(ConnectionHandle, Headers, Payload) -> BoxFuture<'static, Result<Option<HandlerOutcome>, DispatchError>>
        + Send
        + Sync,
>;

pub trait Middleware: Send + Sync {
    fn call(
        &self,
        conn: ConnectionHandle,
        headers: Headers,
        payload: Payload,
        forward: Forward,
    ) -> BoxFuture<'static, Result<Option<HandlerOutcome>, DispatchError>>;
}

/// Build the composed call chain: `middlewares[0]` wraps
/// `middlewares[1]` wraps ... wraps `terminal`.
pub fn compose(middlewares: &[Arc<dyn Middleware>], terminal: Forward) -> Forward {
    let mut forward = terminal;
    for middleware in middlewares.iter().rev() {
        let middleware = middleware.clone();
        let inner = forward.clone();
        forward = Arc::new(move |conn, headers, payload| middleware.call(conn, headers, payload, inner.clone()));
    }
    forward
}

/// Catches any dispatch error and maps it to a status-bearing action rather
/// than letting it propagate and close the connection.
pub struct DefaultErrorHandler;

impl Middleware for DefaultErrorHandler {
    fn call(
        &self,
        conn: ConnectionHandle,
        headers: Headers,
        payload: Payload,
        forward: Forward,
    ) -> BoxFuture<'static, Result<Option<HandlerOutcome>, DispatchError>> {
        Box::pin(async move {
            match forward(conn, headers, payload).await {
                Ok(outcome) => Ok(outcome),
                Err(DispatchError::GuardFailed(msg)) => Ok(Some(error_outcome(400, "GuardFailed", &msg))),
                Err(DispatchError::UnknownHandler(id)) => {
                    Ok(Some(error_outcome(404, "UnknownHandler", &format!("no handler {id}"))))
                }
                Err(DispatchError::OverlappingVersions { handler_id }) => Ok(Some(error_outcome(
                    500,
                    "OverlappingVersions",
                    &format!("handler {handler_id} misconfigured"),
                ))),
            }
        })
    }
}

fn error_outcome(status: i64, class_name: &str, message: &str) -> HandlerOutcome {
    let body = serde_json::json!({ "error": class_name, "message": message });
    let mut headers = Headers::new();
    headers.set_status(status);
    HandlerOutcome { headers, payload: EncodeInput::Document(body) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TagMiddleware {
        tag: u32,
        order: Arc<std::sync::Mutex<Vec<u32>>>,
    }

    impl Middleware for TagMiddleware {
        fn call(
            &self,
            conn: ConnectionHandle,
            headers: Headers,
            payload: Payload,
            forward: Forward,
        ) -> BoxFuture<'static, Result<Option<HandlerOutcome>, DispatchError>> {
            let order = self.order.clone();
            let tag = self.tag;
            Box::pin(async move {
                order.lock().unwrap().push(tag);
                forward(conn, headers, payload).await
            })
        }
    }

    #[tokio::test]
    async fn first_registered_middleware_runs_outermost() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicU32::new(0));
        let middlewares: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(TagMiddleware { tag: 1, order: order.clone() }),
            Arc::new(TagMiddleware { tag: 2, order: order.clone() }),
        ];

        let terminal_counter = counter.clone();
        let terminal_order = order.clone();
        let terminal: Forward = Arc::new(move |_conn, _headers, _payload| {
            terminal_counter.fetch_add(1, Ordering::SeqCst);
            terminal_order.lock().unwrap().push(0);
            Box::pin(async { Ok(None) })
        });

        let chain = compose(&middlewares, terminal);
        let conn = ConnectionHandle::for_test();
        let _ = chain(conn, Headers::new(), Payload::Bytes(vec![])).await;

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 0]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
