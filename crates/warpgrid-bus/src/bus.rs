//! Bus orchestration: runs the handler on its own task and waits for
//! its first signal.
//!
//! One call has exactly one outcome: a [`Response`], a live
//! [`SectionStream`], or an error. The wait races the handler's signal,
//! the caller's cancellation, the response timer, and the handler task
//! itself (to surface panics). Cancellation wins a tie with a signal, and
//! a pending handler panic wins over cancellation.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error};

use crate::config::{BusConfig, DEFAULT_TIMEOUT};
use crate::error::{BusError, BusResult};
use crate::request::Request;
use crate::response::Response;
use crate::section::SectionStream;
use crate::sender::{Sender, Signal};
use crate::stream::UnwindSlot;
use crate::timer::{BoxFuture, Timers};

/// The handler bound to a bus.
///
/// Invoked once per call on a fresh task with the caller's cancellation
/// token, a single-use [`Sender`] and the request. It must answer through
/// exactly one of [`Sender::send_response`] or
/// [`Sender::send_parallel_response`].
pub type RequestHandler = Arc<dyn Fn(CancellationToken, Sender, Request) -> BoxFuture + Send + Sync>;

/// Successful outcome of a bus call.
#[derive(Debug)]
pub enum Reply {
    Response(Response),
    /// Must be read to the end; see [`SectionStream`].
    Sections(SectionStream),
}

impl Reply {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Sections(_))
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Response(resp) => Some(resp),
            Self::Sections(_) => None,
        }
    }

    pub fn into_sections(self) -> Option<SectionStream> {
        match self {
            Self::Sections(sections) => Some(sections),
            Self::Response(_) => None,
        }
    }
}

/// In-process request bus bound to one handler for its lifetime.
#[derive(Clone)]
pub struct Bus {
    handler: RequestHandler,
    timers: Timers,
    default_timeout: Duration,
}

impl Bus {
    pub fn new(handler: RequestHandler) -> Self {
        Self {
            handler,
            timers: Timers::default(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build a bus from an `async` closure.
    pub fn from_fn<F, Fut>(handler: F) -> Self
    where
        F: Fn(CancellationToken, Sender, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::new(Arc::new(move |cancel, sender, request| {
            Box::pin(handler(cancel, sender, request))
        }))
    }

    pub fn from_config(handler: RequestHandler, config: &BusConfig) -> Self {
        Self::new(handler).with_default_timeout(config.response_timeout())
    }

    /// Replace the timing sources for the response, section and element waits.
    pub fn with_timers(mut self, timers: Timers) -> Self {
        self.timers = timers;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// [`send_request2`](Self::send_request2) with the bus' default timeout.
    pub async fn send_request(&self, cancel: &CancellationToken, request: Request) -> BusResult<Reply> {
        self.send_request2(cancel, request, self.default_timeout).await
    }

    /// Run the handler for `request` and wait for its answer.
    ///
    /// `timeout` bounds the wait for the first signal and, once streaming,
    /// each section and element hand-off. Errors:
    ///
    /// - [`BusError::TimeoutExpired`] if the handler did not answer in time,
    /// - [`BusError::Cancelled`] if `cancel` fired first, or together with
    ///   the answer,
    /// - the recovered panic if the handler panicked before answering.
    pub async fn send_request2(
        &self,
        cancel: &CancellationToken,
        request: Request,
        timeout: Duration,
    ) -> BusResult<Reply> {
        let (signal_tx, mut signal_rx) = oneshot::channel();
        let unwind = UnwindSlot::default();
        let sender = Sender::new(
            signal_tx,
            cancel.clone(),
            timeout,
            self.timers.clone(),
            unwind.clone(),
        );

        let resource = request.resource.clone();
        let wsid = request.wsid;
        debug!(%resource, %wsid, ?timeout, "dispatching request to handler");

        let handler = self.handler.clone();
        let handler_cancel = cancel.clone();
        let span = debug_span!("bus_request", %resource, %wsid);
        let handling = handler(handler_cancel, sender, request).instrument(span);
        let mut task = tokio::spawn(async move {
            // A stream dropped mid-panic stays open until its terminal error is set.
            match AssertUnwindSafe(handling).catch_unwind().await {
                Ok(()) => unwind.release(BusError::HandlerPanic(
                    "handler panicked while streaming".to_string(),
                )),
                Err(payload) if unwind.is_parked() => {
                    let err = BusError::from_panic(payload);
                    error!(error = %err, "request handler panicked while streaming");
                    unwind.release(err);
                }
                Err(payload) => std::panic::resume_unwind(payload),
            }
        });

        let mut timer = (self.timers.response)(timeout);
        let mut signal_open = true;
        let mut task_running = true;

        loop {
            tokio::select! {
                signal = &mut signal_rx, if signal_open => match signal {
                    Ok(_) if cancel.is_cancelled() => {
                        debug!(%resource, "request cancelled as the answer arrived");
                        return Err(BusError::Cancelled);
                    }
                    Ok(Signal::Response(resp)) => {
                        debug!(%resource, status = resp.status_code, "handler responded");
                        return Ok(Reply::Response(resp));
                    }
                    Ok(Signal::Sections(sections)) => {
                        debug!(%resource, "handler started streaming");
                        return Ok(Reply::Sections(sections));
                    }
                    Err(_) => {
                        // Sender dropped unused; only timeout or cancel remain.
                        signal_open = false;
                    }
                },
                joined = &mut task, if task_running => {
                    task_running = false;
                    if let Err(err) = joined {
                        let err = handler_failure(err);
                        error!(%resource, error = %err, "request handler panicked");
                        return Err(err);
                    }
                },
                _ = cancel.cancelled() => {
                    if let Some(err) = finished_with_panic(&mut task, task_running).await {
                        error!(%resource, error = %err, "request handler panicked");
                        return Err(err);
                    }
                    debug!(%resource, "request cancelled by caller");
                    return Err(BusError::Cancelled);
                },
                _ = &mut timer => {
                    debug!(%resource, ?timeout, "no response from handler");
                    return Err(BusError::TimeoutExpired);
                },
            }
        }
    }
}

/// The handler task's panic, if it has already ended with one.
async fn finished_with_panic(task: &mut JoinHandle<()>, running: bool) -> Option<BusError> {
    if !running || !task.is_finished() {
        return None;
    }
    task.await.err().map(handler_failure)
}

fn handler_failure(err: JoinError) -> BusError {
    match err.try_into_panic() {
        Ok(payload) => BusError::from_panic(payload),
        Err(_) => BusError::Cancelled,
    }
}
