//! Error types for catalog resolution and task execution.
//!
//! Provides [`Error`], a rich error enum with context fields and JSON-RPC
//! error code mapping, plus [`ErrorPayload`], the serializable form stored
//! on failed background tasks so clients can distinguish policy violations
//! from handler errors from infrastructure failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by catalog resolution, component calls, and task
/// operations.
///
/// Each variant carries enough context to aid debugging. Use
/// [`error_code`](Error::error_code) to map to the JSON-RPC error code for
/// wire responses.
///
/// # Examples
///
/// ```
/// use mcp_fabric::Error;
///
/// let err = Error::NotFound { key: "tool:missing".to_string() };
/// assert_eq!(err.error_code(), -32602);
/// assert!(err.to_string().contains("tool:missing"));
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown component name/version, or a task ID not visible to the
    /// requesting session. Deliberately identical whether the key never
    /// existed or belongs to another session.
    #[error("not found: {key}")]
    NotFound {
        /// The component key or task ID that was not found.
        key: String,
    },

    /// Task-mode policy violation: a component with `mode = required` was
    /// called without task metadata, or one with `mode = forbidden` was
    /// called with task metadata.
    #[error("{component} {explanation}")]
    MethodNotSupported {
        /// The component key whose policy was violated.
        component: String,
        /// Human-readable explanation naming the conflicting mode.
        explanation: String,
    },

    /// Arguments failed validation against the component's parameter
    /// schema. Raised before the handler is invoked.
    #[error("validation failed for {component}: {message}")]
    Validation {
        /// The component key whose arguments were rejected.
        component: String,
        /// What was wrong with the arguments.
        message: String,
    },

    /// The component's own logic raised. Surfaced directly for synchronous
    /// calls; stored as the terminal `failed` payload for background tasks.
    #[error("handler error in {component}: {message}")]
    Handler {
        /// The component key whose handler failed.
        component: String,
        /// The handler's error message.
        message: String,
    },

    /// A single provider failed to enumerate or resolve. Only surfaced
    /// when the aggregate is configured to fail hard; otherwise logged and
    /// degraded to zero components.
    #[error("provider unavailable: {provider}: {message}")]
    ProviderUnavailable {
        /// A short label identifying the provider.
        provider: String,
        /// The underlying failure.
        message: String,
    },

    /// Component registration rejected (e.g. task mode enabled on a
    /// blocking handler, duplicate key).
    #[error("invalid registration for {component}: {message}")]
    Registration {
        /// The component key being registered.
        component: String,
        /// Why registration was rejected.
        message: String,
    },

    /// Invalid state machine transition on a task.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task being transitioned.
        task_id: String,
        /// Its current status.
        from: crate::tasks::TaskStatus,
        /// The rejected target status.
        to: crate::tasks::TaskStatus,
    },

    /// Task is not yet in a terminal state (needed for result retrieval
    /// without blocking, or a poll raced eviction).
    #[error("task not in terminal state: {task_id}")]
    NotReady {
        /// The task ID.
        task_id: String,
    },

    /// The session backing an in-flight call died before the call
    /// resolved.
    #[error("session {session_id} closed while awaiting response")]
    SessionClosed {
        /// The session that died.
        session_id: String,
    },

    /// Resource limits exceeded (e.g. too many active tasks per session).
    #[error("resource exhausted: {message}")]
    ResourceExhausted {
        /// What limit was hit and what the caller can do.
        message: String,
    },

    /// Infrastructure failure (backend store, dispatch, serialization).
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an [`Error::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Maps this error to a JSON-RPC error code.
    ///
    /// - `-32601` (Method not found): task-mode policy violations.
    /// - `-32602` (Invalid params): not-found, validation, registration,
    ///   transition, and not-ready errors.
    /// - `-32603` (Internal error): handler, provider, session, resource,
    ///   and infrastructure failures.
    ///
    /// # Examples
    ///
    /// ```
    /// use mcp_fabric::Error;
    ///
    /// let err = Error::MethodNotSupported {
    ///     component: "tool:burn".to_string(),
    ///     explanation: "requires task-augmented execution".to_string(),
    /// };
    /// assert_eq!(err.error_code(), -32601);
    /// ```
    pub fn error_code(&self) -> i32 {
        match self {
            Self::MethodNotSupported { .. } => -32601,
            Self::NotFound { .. }
            | Self::Validation { .. }
            | Self::Registration { .. }
            | Self::InvalidTransition { .. }
            | Self::NotReady { .. } => -32602,
            Self::Handler { .. }
            | Self::ProviderUnavailable { .. }
            | Self::SessionClosed { .. }
            | Self::ResourceExhausted { .. }
            | Self::Internal(_) => -32603,
        }
    }

    /// Coarse error kind label used in [`ErrorPayload`].
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::MethodNotSupported { .. } => "method_not_supported",
            Self::Validation { .. } => "validation",
            Self::Handler { .. } => "handler",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::Registration { .. } => "registration",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::NotReady { .. } => "not_ready",
            Self::SessionClosed { .. } => "session_closed",
            Self::ResourceExhausted { .. } => "resource_exhausted",
            Self::Internal(_) => "internal",
        }
    }

    /// Converts this error into the serializable payload stored on failed
    /// tasks.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            kind: self.kind().to_string(),
            code: self.error_code(),
            message: self.to_string(),
        }
    }
}

/// Serializable error record retained on a failed task for later
/// retrieval.
///
/// Carries enough structure (`kind` + `code` + `message`) for a client to
/// distinguish policy violations from handler-thrown errors from
/// infrastructure failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Coarse error kind (`handler`, `validation`, `internal`, ...).
    pub kind: String,
    /// JSON-RPC error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl ErrorPayload {
    /// Rehydrates the payload into an [`Error::Handler`]-class error for
    /// re-raising at `result()` time.
    pub fn into_error(self) -> Error {
        match self.kind.as_str() {
            "validation" => Error::Validation {
                component: String::new(),
                message: self.message,
            },
            "internal" => Error::Internal(self.message),
            _ => Error::Handler {
                component: String::new(),
                message: self.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_by_class() {
        let method = Error::MethodNotSupported {
            component: "tool:x".into(),
            explanation: "does not support task-augmented execution".into(),
        };
        assert_eq!(method.error_code(), -32601);

        let not_found = Error::NotFound {
            key: "tool:x".into(),
        };
        assert_eq!(not_found.error_code(), -32602);

        let handler = Error::Handler {
            component: "tool:x".into(),
            message: "boom".into(),
        };
        assert_eq!(handler.error_code(), -32603);
    }

    #[test]
    fn not_found_message_never_reveals_ownership() {
        let a = Error::NotFound {
            key: "task-1".into(),
        };
        let b = Error::NotFound {
            key: "task-1".into(),
        };
        // Same wording regardless of why the key is invisible.
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn payload_round_trip() {
        let err = Error::Handler {
            component: "tool:fail".into(),
            message: "division by zero".into(),
        };
        let payload = err.to_payload();
        assert_eq!(payload.kind, "handler");
        assert_eq!(payload.code, -32603);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "handler");
        assert_eq!(json["code"], -32603);

        let back: ErrorPayload = serde_json::from_value(json).unwrap();
        assert!(matches!(back.into_error(), Error::Handler { .. }));
    }

    #[test]
    fn method_not_supported_names_mode() {
        let err = Error::MethodNotSupported {
            component: "tool:sleep".into(),
            explanation: "requires task-augmented execution (mode=required)".into(),
        };
        assert!(err.to_string().contains("mode=required"));
    }
}
