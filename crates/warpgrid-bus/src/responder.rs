//! Status-and-JSON oriented answers on top of [`Sender`].
//!
//! [`Responder::respond`] sends one JSON document. For result sets,
//! [`Responder::init_response`] starts an "API array": a streamed reply
//! made of a single array section, written one JSON value at a time.

use bytes::Bytes;
use serde::Serialize;

use crate::error::{BusError, BusResult};
use crate::response::{Response, ResponseMeta};
use crate::sender::Sender;
use crate::stream::StreamSender;

/// Section type of the single array section of an API array reply.
pub const API_ARRAY_SECTION: &str = "api-array";

pub struct Responder {
    sender: Sender,
}

impl Responder {
    pub fn new(sender: Sender) -> Self {
        Self { sender }
    }

    /// Send `body` JSON-encoded with the given content type and status.
    pub fn respond<T: Serialize + ?Sized>(self, meta: ResponseMeta, body: &T) -> BusResult<()> {
        let data = serde_json::to_vec(body)?;
        self.respond_raw(meta, data);
        Ok(())
    }

    pub fn respond_raw(self, meta: ResponseMeta, data: impl Into<Bytes>) {
        self.sender
            .send_response(Response::new(meta.content_type, meta.status_code, data));
    }

    /// Start an API array reply with `status_code`.
    pub fn init_response(self, status_code: u16) -> ResponseWriter {
        let mut stream = self
            .sender
            .send_parallel_response_with(ResponseMeta::json(status_code));
        stream.start_array_section(API_ARRAY_SECTION, &[]);
        ResponseWriter { stream }
    }
}

/// Writer for an API array reply. Finish with [`close`](Self::close).
pub struct ResponseWriter {
    stream: StreamSender,
}

impl ResponseWriter {
    /// Append one JSON value. Fails with [`BusError::NoConsumer`] or
    /// [`BusError::Cancelled`] once the caller stopped reading.
    pub async fn write<T: Serialize + ?Sized>(&mut self, value: &T) -> BusResult<()> {
        self.stream.send_element("", value).await
    }

    pub fn close(self, err: Option<BusError>) {
        self.stream.close(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, Reply};
    use crate::request::Request;
    use serde_json::{json, Value};
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn respond_sends_json_document() {
        let bus = Bus::from_fn(|_cancel, sender, _request| async move {
            Responder::new(sender)
                .respond(ResponseMeta::json(201), &json!({"id": 1}))
                .unwrap();
        });

        let cancel = CancellationToken::new();
        let resp = bus
            .send_request(&cancel, Request::default())
            .await
            .unwrap()
            .into_response()
            .unwrap();
        assert_eq!(resp.status_code, 201);
        assert_eq!(resp.content_type, "application/json");
        let body: Value = serde_json::from_slice(&resp.data).unwrap();
        assert_eq!(body, json!({"id": 1}));
    }

    #[tokio::test]
    async fn api_array_round_trip() {
        let bus = Bus::from_fn(|_cancel, sender, _request| async move {
            let mut writer = Responder::new(sender).init_response(200);
            writer.write(&json!({"fld1": 42, "fld2": "str"})).await.unwrap();
            writer.write(&json!({"fld1": 43, "fld2": "str1"})).await.unwrap();
            writer.close(None);
        });

        let cancel = CancellationToken::new();
        let reply = bus.send_request(&cancel, Request::default()).await.unwrap();
        let Reply::Sections(mut sections) = reply else {
            panic!("expected a streamed reply");
        };
        assert_eq!(sections.meta(), &ResponseMeta::json(200));

        let array = sections.next(&cancel).await.unwrap().into_array().unwrap();
        assert_eq!(array.section_type(), API_ARRAY_SECTION);
        let mut rows = Vec::new();
        while let Some(value) = array.next(&cancel).await {
            rows.push(serde_json::from_slice::<Value>(&value).unwrap());
        }
        assert_eq!(
            rows,
            vec![
                json!({"fld1": 42, "fld2": "str"}),
                json!({"fld1": 43, "fld2": "str1"}),
            ]
        );
        assert!(sections.next(&cancel).await.is_none());
        assert!(sections.terminal_error().is_none());
    }
}
