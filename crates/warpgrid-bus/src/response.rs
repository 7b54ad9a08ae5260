use bytes::Bytes;
use serde::Serialize;

use crate::error::BusResult;
use crate::header::{APPLICATION_JSON, TEXT_PLAIN};

/// A single, fully materialized reply.
///
/// Produced once by the handler through
/// [`Sender::send_response`](crate::Sender::send_response) and owned by
/// the caller once delivered. `Default` is the empty response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub content_type: String,
    pub status_code: u16,
    pub data: Bytes,
}

impl Response {
    pub fn new(content_type: impl Into<String>, status_code: u16, data: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            status_code,
            data: data.into(),
        }
    }

    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        let body: String = body.into();
        Self::new(TEXT_PLAIN, status_code, body)
    }

    /// JSON-encode `body` into an `application/json` response.
    pub fn json<T: Serialize + ?Sized>(status_code: u16, body: &T) -> BusResult<Self> {
        let data = serde_json::to_vec(body)?;
        Ok(Self::new(APPLICATION_JSON, status_code, data))
    }

    pub fn is_empty(&self) -> bool {
        self.content_type.is_empty() && self.status_code == 0 && self.data.is_empty()
    }

    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            content_type: self.content_type.clone(),
            status_code: self.status_code,
        }
    }
}

/// Content type and status of a reply, without its body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub content_type: String,
    pub status_code: u16,
}

impl ResponseMeta {
    pub fn new(content_type: impl Into<String>, status_code: u16) -> Self {
        Self {
            content_type: content_type.into(),
            status_code,
        }
    }

    pub fn json(status_code: u16) -> Self {
        Self::new(APPLICATION_JSON, status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_response_is_empty() {
        assert!(Response::default().is_empty());
        assert!(!Response::text(200, "ok").is_empty());
    }

    #[test]
    fn json_response() {
        let resp = Response::json(201, &serde_json::json!({"id": 7})).unwrap();
        assert_eq!(resp.content_type, APPLICATION_JSON);
        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.data.as_ref(), br#"{"id":7}"#);
    }

    #[test]
    fn meta_strips_body() {
        let resp = Response::text(404, "missing");
        assert_eq!(resp.meta(), ResponseMeta::new(TEXT_PLAIN, 404));
    }
}
