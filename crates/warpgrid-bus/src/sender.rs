use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::response::{Response, ResponseMeta};
use crate::section::SectionStream;
use crate::stream::{self, StreamSender, UnwindSlot};
use crate::timer::Timers;

/// The handler's first (and only) signal to the waiting caller.
#[derive(Debug)]
pub(crate) enum Signal {
    Response(Response),
    Sections(SectionStream),
}

/// Per-call handle given to the handler.
///
/// Offers exactly two terminal actions, each consuming the sender, so a
/// handler cannot answer twice:
///
/// ```compile_fail
/// # use warpgrid_bus::{Response, Sender};
/// fn respond_twice(sender: Sender) {
///     sender.send_response(Response::default());
///     sender.send_response(Response::default());
/// }
/// ```
///
/// ```compile_fail
/// # use warpgrid_bus::{Response, Sender};
/// fn stream_then_respond(sender: Sender) {
///     let rs = sender.send_parallel_response();
///     sender.send_response(Response::default());
/// }
/// ```
pub struct Sender {
    signal: Option<oneshot::Sender<Signal>>,
    cancel: CancellationToken,
    timeout: Duration,
    timers: Timers,
    unwind: UnwindSlot,
}

impl Sender {
    pub(crate) fn new(
        signal: oneshot::Sender<Signal>,
        cancel: CancellationToken,
        timeout: Duration,
        timers: Timers,
        unwind: UnwindSlot,
    ) -> Self {
        Self {
            signal: Some(signal),
            cancel,
            timeout,
            timers,
            unwind,
        }
    }

    /// Answer with a single response.
    pub fn send_response(mut self, response: Response) {
        self.signal(Signal::Response(response));
    }

    /// Answer with a streamed reply described as `application/json`, 200.
    pub fn send_parallel_response(self) -> StreamSender {
        self.send_parallel_response_with(ResponseMeta::json(200))
    }

    /// Answer with a streamed reply carrying `meta`.
    pub fn send_parallel_response_with(mut self, meta: ResponseMeta) -> StreamSender {
        let (sender, sections) = stream::channel(
            self.cancel.clone(),
            self.timeout,
            self.timers.clone(),
            meta,
            Some(self.unwind.clone()),
        );
        self.signal(Signal::Sections(sections));
        sender
    }

    fn signal(&mut self, signal: Signal) {
        let Some(tx) = self.signal.take() else {
            return;
        };
        if tx.send(signal).is_err() {
            // The caller already returned (timeout or cancellation). A
            // dropped section stream makes later sends fail with NoConsumer.
            debug!("caller no longer waiting for a response");
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if self.signal.is_some() {
            warn!("sender dropped without a response");
        }
    }
}
