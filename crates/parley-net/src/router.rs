//! Method routing: a thread-safe `method → handler` table producing
//! response or error envelopes.

use parley_protocol::{Message, MessageType, error_codes};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Failure raised by a handler.  The two variants map to the two
/// client-visible handler error codes.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// `params` did not have the shape the handler expected (`-32001`).
    #[error("{0}")]
    Shape(String),
    /// Any other handler failure (`-32000`).
    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::Shape(e.to_string())
    }
}

/// A routable operation: `(params, uid) → result`.
pub type Handler = Arc<dyn Fn(&Value, u32) -> Result<Value, HandlerError> + Send + Sync>;

type FallbackBuilder = Box<dyn Fn(&Message, i32, &str) -> Message + Send + Sync>;

pub struct Router {
    handlers: Mutex<HashMap<String, Handler>>,
    fallback: Mutex<FallbackBuilder>,
}

impl Router {
    pub fn new() -> Self {
        Router {
            handlers: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Box::new(|request, code, message| {
                Message::error(request.id(), code, message)
            })),
        }
    }

    /// Register `handler` under `method`, replacing any previous one.
    pub fn add<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value, u32) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .expect("handlers lock")
            .insert(method.to_owned(), Arc::new(handler));
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers
            .lock()
            .expect("handlers lock")
            .contains_key(method)
    }

    /// Swap the error-envelope builder used for every failure path.
    pub fn set_fallback<F>(&self, builder: F)
    where
        F: Fn(&Message, i32, &str) -> Message + Send + Sync + 'static,
    {
        *self.fallback.lock().expect("fallback lock") = Box::new(builder);
    }

    /// Dispatch one message for the session `uid`, always producing a
    /// response envelope.  The handler runs outside the table lock.
    pub fn handle(&self, request: &Message, uid: u32) -> Message {
        if request.kind != MessageType::Request {
            return self.fail(
                request,
                error_codes::INVALID_REQUEST,
                "Invalid Request: Not a request",
            );
        }

        let Some(method) = request.method() else {
            return self.fail(
                request,
                error_codes::INVALID_REQUEST,
                "Invalid Request: No method",
            );
        };

        let handler = {
            self.handlers
                .lock()
                .expect("handlers lock")
                .get(method)
                .cloned()
        };
        let Some(handler) = handler else {
            return self.fail(
                request,
                error_codes::METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            );
        };

        let params = request.params();
        match handler(&params, uid) {
            Ok(result) => Message::response(request.id(), result),
            Err(HandlerError::Shape(e)) => self.fail(
                request,
                error_codes::JSON_SHAPE,
                &format!("Handler JSON error: {e}"),
            ),
            Err(HandlerError::Failed(e)) => self.fail(
                request,
                error_codes::SERVER_ERROR,
                &format!("Server error: {e}"),
            ),
        }
    }

    fn fail(&self, request: &Message, code: i32, message: &str) -> Message {
        (self.fallback.lock().expect("fallback lock"))(request, code, message)
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new()
    }
}
