//! Error types for the request bus.

use std::any::Any;

use thiserror::Error;

/// Result type alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Errors surfaced by the bus, either as the call error of
/// [`Bus::send_request2`](crate::Bus::send_request2) or through the
/// terminal error of a section stream.
///
/// Handler bugs (sending an element with no section open) are not part of
/// this taxonomy: they panic on the handler task.
#[derive(Debug, Error)]
pub enum BusError {
    /// Nothing arrived before the wait expired.
    #[error("timeout expired")]
    TimeoutExpired,

    /// The producer gave up a hand-off because nobody was reading.
    /// Further sending is senseless.
    #[error("no consumer for the stream")]
    NoConsumer,

    /// The caller cancelled the request.
    #[error("context canceled")]
    Cancelled,

    /// The handler panicked with a message.
    #[error("{0}")]
    HandlerPanic(String),

    /// An error produced by the handler itself.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),

    #[error("failed to marshal element: {0}")]
    Marshal(#[from] serde_json::Error),

    #[error("invalid bus config: {0}")]
    Config(String),
}

impl BusError {
    /// Wrap any handler-side error.
    pub fn handler(err: impl Into<anyhow::Error>) -> Self {
        Self::Handler(err.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutExpired)
    }

    pub fn is_no_consumer(&self) -> bool {
        matches!(self, Self::NoConsumer)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Convert a recovered panic payload into an error.
    ///
    /// String payloads keep their message verbatim. Error payloads
    /// (`BusError`, `anyhow::Error`) are passed through unchanged.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<BusError>() {
            Ok(err) => return *err,
            Err(other) => other,
        };
        let payload = match payload.downcast::<anyhow::Error>() {
            Ok(err) => return Self::Handler(*err),
            Err(other) => other,
        };
        if let Some(msg) = payload.downcast_ref::<&'static str>() {
            return Self::HandlerPanic((*msg).to_string());
        }
        match payload.downcast::<String>() {
            Ok(msg) => Self::HandlerPanic(*msg),
            Err(_) => Self::HandlerPanic("handler panicked".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn display_matches_taxonomy() {
        assert_eq!(BusError::TimeoutExpired.to_string(), "timeout expired");
        assert_eq!(BusError::Cancelled.to_string(), "context canceled");
        assert_eq!(BusError::HandlerPanic("boom".into()).to_string(), "boom");
    }

    #[test]
    fn panic_with_str_keeps_message() {
        let err = BusError::from_panic(Box::new("boom"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn panic_with_string_keeps_message() {
        let err = BusError::from_panic(Box::new(format!("bad {}", 42)));
        assert_eq!(err.to_string(), "bad 42");
    }

    #[test]
    fn panic_with_anyhow_error_passes_through() {
        let err = BusError::from_panic(Box::new(anyhow::Error::new(DiskError)));
        match err {
            BusError::Handler(inner) => assert!(inner.downcast_ref::<DiskError>().is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn panic_with_bus_error_is_reused() {
        let err = BusError::from_panic(Box::new(BusError::NoConsumer));
        assert!(err.is_no_consumer());
    }

    #[test]
    fn panic_with_opaque_payload() {
        let err = BusError::from_panic(Box::new(17_u32));
        assert!(matches!(err, BusError::HandlerPanic(_)));
    }

    #[test]
    fn handler_error_is_transparent() {
        let err = BusError::handler(DiskError);
        assert_eq!(err.to_string(), "disk on fire");
    }
}
