//! Routing table: normalized path -> method -> handler.
//!
//! The table is filled before the server starts and is shared read-only by
//! every worker afterwards, so lookups need no synchronization.

use crate::http::{Method, Request, Response, StatusCode, Uri};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Failure reported by a handler. Its message becomes the 500 response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

pub type HandlerResult = Result<Response, HandlerError>;

/// A request handler. Must be callable from any worker thread.
pub type Handler = Arc<dyn Fn(&Request) -> HandlerResult + Send + Sync>;

/// Message sent when a handler panics; the panic payload is not exposed.
const HANDLER_PANIC_MESSAGE: &str = "request handler failed";

#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<Uri, BTreeMap<Method, Handler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `(path, method)`, replacing any previous one.
    pub fn route<F>(&mut self, path: &str, method: Method, handler: F)
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.routes
            .entry(Uri::new(path))
            .or_default()
            .insert(method, Arc::new(handler));
    }

    /// Builder-style variant of [`Router::route`].
    pub fn with_route<F>(mut self, path: &str, method: Method, handler: F) -> Self
    where
        F: Fn(&Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(path, method, handler);
        self
    }

    /// Number of registered `(path, method)` pairs.
    pub fn len(&self) -> usize {
        self.routes.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Methods registered for `path`, in method order.
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        self.routes
            .get(&Uri::new(path))
            .map(|methods| methods.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Run the handler registered for the request's path and method.
    ///
    /// - unknown path: 404 with no body
    /// - known path, unknown method: 405 with an `Allow` header
    /// - handler error or panic: 500 with a diagnostic body
    pub fn dispatch(&self, request: &Request) -> Response {
        let Some(methods) = self.routes.get(request.uri()) else {
            return Response::new(StatusCode::NotFound);
        };

        let Some(handler) = methods.get(&request.method()) else {
            let allow = methods
                .keys()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let mut response = Response::new(StatusCode::MethodNotAllowed);
            response.set_header("Allow", &allow);
            return response;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler(request))) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => Response::text(StatusCode::InternalServerError, e.message()),
            Err(_) => {
                warn!(
                    path = %request.uri(),
                    method = %request.method(),
                    "Request handler panicked"
                );
                Response::text(StatusCode::InternalServerError, HANDLER_PANIC_MESSAGE)
            }
        }
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (uri, methods) in &self.routes {
            map.entry(&uri.path(), &methods.keys().collect::<Vec<_>>());
        }
        map.finish()
    }
}
