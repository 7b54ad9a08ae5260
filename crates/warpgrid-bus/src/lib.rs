//! In-process request bus for WarpGrid.
//!
//! Decouples a request initiator from a concurrently running handler.
//! A [`Bus`] is bound to one [`RequestHandler`]; each
//! [`Bus::send_request2`] call spawns the handler on its own task with a
//! single-use [`Sender`], and the handler answers either with one
//! [`Response`] or with a streamed reply ([`StreamSender`]).
//!
//! # Streaming Model
//!
//! A streamed reply is an ordered sequence of typed, path-addressed
//! [`Section`]s (array, map, object), each carrying its own element
//! stream. Every section and every element moves through an unbuffered
//! rendezvous: the producer waits until the caller is ready to take it,
//! bounded by a per-hand-off timeout. Memory stays bounded by one element
//! in flight regardless of result size, and a caller that stops reading
//! makes the producer fail with [`BusError::NoConsumer`] instead of
//! blocking forever.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use warpgrid_bus::{Bus, Reply, Request, Response};
//!
//! # async fn demo() -> warpgrid_bus::BusResult<()> {
//! let bus = Bus::from_fn(|_cancel, sender, request| async move {
//!     sender.send_response(Response::text(200, request.resource));
//! });
//!
//! let cancel = CancellationToken::new();
//! let reply = bus
//!     .send_request2(&cancel, Request::default(), Duration::from_secs(1))
//!     .await?;
//! assert!(matches!(reply, Reply::Response(_)));
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod header;
mod rendezvous;
pub mod request;
pub mod responder;
pub mod response;
pub mod section;
pub mod sender;
pub mod stream;
pub mod timer;

pub use bus::{Bus, Reply, RequestHandler};
pub use config::{BusConfig, DEFAULT_TIMEOUT};
pub use error::{BusError, BusResult};
pub use header::HeaderMap;
pub use request::{AppQName, Method, PartitionId, Request, WsId};
pub use responder::{Responder, ResponseWriter};
pub use response::{Response, ResponseMeta};
pub use section::{
    ArraySection, Element, MapSection, ObjectSection, Section, SectionKind, SectionStream,
    TerminalError,
};
pub use sender::Sender;
pub use stream::StreamSender;
pub use timer::{TimerFn, Timers};
