//! Producer side of a streamed reply.
//!
//! [`StreamSender`] sequences sections and, within the open section, its
//! elements. A section is announced to the caller lazily, together with
//! its first element; starting another section first closes the element
//! stream of the previous one.
//!
//! Each hand-off is a rendezvous bounded by its own timer: the section
//! timer while the caller has not picked up the section, the element
//! timer while it has not pulled the element. Expiry abandons the value
//! and reports [`BusError::NoConsumer`].

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{BusError, BusResult};
use crate::rendezvous::{self, PushError, Puller, Pusher};
use crate::response::ResponseMeta;
use crate::section::{Element, Section, SectionHeader, SectionStream, TerminalError};
use crate::timer::{BoxFuture, Timers};

const NULL: &[u8] = b"null";

/// Handler-side handle for a streamed reply.
///
/// Obtained from [`Sender::send_parallel_response`](crate::Sender::send_parallel_response).
/// Must be finished with [`close`](Self::close), which consumes the
/// handle; nothing can be sent after it:
///
/// ```compile_fail
/// # use warpgrid_bus::StreamSender;
/// async fn send_after_close(mut rs: StreamSender) {
///     rs.close(None);
///     rs.start_array_section("array", &[]);
/// }
/// ```
///
/// Dropping the handle without closing it ends the stream with no
/// terminal error, or with a panic error if the handler is unwinding.
pub struct StreamSender {
    sections: Pusher<Section>,
    /// Started but not yet announced section.
    pending: Option<Section>,
    /// Element stream of the open section.
    elements: Option<Pusher<Element>>,
    terminal: TerminalError,
    cancel: CancellationToken,
    timeout: Duration,
    timers: Timers,
    /// Where the stream is parked if the handler panics mid-stream.
    unwind: Option<UnwindSlot>,
    closed: bool,
}

/// Create a connected producer/caller pair for one streamed reply.
pub(crate) fn channel(
    cancel: CancellationToken,
    timeout: Duration,
    timers: Timers,
    meta: ResponseMeta,
    unwind: Option<UnwindSlot>,
) -> (StreamSender, SectionStream) {
    let (sections, puller) = rendezvous::channel();
    let terminal = TerminalError::default();
    let stream = SectionStream::new(puller, terminal.clone(), meta);
    let sender = StreamSender {
        sections,
        pending: None,
        elements: None,
        terminal,
        cancel,
        timeout,
        timers,
        unwind,
        closed: false,
    };
    (sender, stream)
}

impl StreamSender {
    /// Open an array section. Elements sent next are unnamed values.
    pub fn start_array_section(&mut self, section_type: impl Into<String>, path: &[&str]) {
        let header = SectionHeader::new(section_type, path);
        self.open_section(|elements| Section::array(header, elements));
    }

    /// Open a map section. Elements sent next are keyed by their name.
    pub fn start_map_section(&mut self, section_type: impl Into<String>, path: &[&str]) {
        let header = SectionHeader::new(section_type, path);
        self.open_section(|elements| Section::map(header, elements));
    }

    /// Send a one-element section holding the JSON encoding of `value`.
    ///
    /// A value encoding to `null` sends nothing. No element can follow an
    /// object section until another section is started.
    pub async fn object_section<T: Serialize + ?Sized>(
        &mut self,
        section_type: impl Into<String>,
        path: &[&str],
        value: &T,
    ) -> BusResult<()> {
        self.open_object(section_type, path);
        let result = self.send_element("", value).await;
        self.finish_object();
        result
    }

    /// Like [`object_section`](Self::object_section) for an already
    /// encoded value.
    pub async fn raw_object_section(
        &mut self,
        section_type: impl Into<String>,
        path: &[&str],
        value: impl Into<Bytes>,
    ) -> BusResult<()> {
        self.open_object(section_type, path);
        let result = self.send_raw_element("", value).await;
        self.finish_object();
        result
    }

    /// Send one element into the open section, JSON-encoded.
    ///
    /// Values encoding to `null` (such as `None`) are dropped. An encoding
    /// failure is returned as [`BusError::Marshal`] and leaves the stream
    /// as it was.
    ///
    /// # Panics
    ///
    /// If no section is open, unless the value is `null`.
    pub async fn send_element<T: Serialize + ?Sized>(&mut self, name: &str, value: &T) -> BusResult<()> {
        let encoded = serde_json::to_vec(value);
        if matches!(&encoded, Ok(bytes) if bytes.as_slice() == NULL) {
            return Ok(());
        }
        self.ensure_section_open();
        self.send_raw_element(name, encoded?).await
    }

    /// Send one already encoded element into the open section.
    ///
    /// # Panics
    ///
    /// If no section is open.
    pub async fn send_raw_element(&mut self, name: &str, value: impl Into<Bytes>) -> BusResult<()> {
        self.ensure_section_open();
        self.announce_section().await?;
        let Some(elements) = self.elements.as_mut() else {
            contract_violation("element sent while no section is open");
        };
        let element = Element {
            name: name.to_string(),
            value: value.into(),
        };
        let timer = (self.timers.element)(self.timeout);
        hand_off(elements, element, &self.cancel, timer).await
    }

    /// Finish the stream. `err` becomes the terminal error the caller
    /// reads after draining the sections.
    pub fn close(mut self, err: Option<BusError>) {
        if let Some(err) = err {
            debug!(error = %err, "closing section stream with error");
            self.terminal.set(err);
        } else {
            debug!("closing section stream");
        }
        self.closed = true;
        // Dropping `self` ends the section stream and any open element stream.
    }

    fn ensure_section_open(&self) {
        if self.elements.is_none() {
            contract_violation("element sent while no section is open");
        }
    }

    fn open_section(&mut self, section: impl FnOnce(Puller<Element>) -> Section) {
        let (elements, puller) = rendezvous::channel();
        // Replacing the pusher closes the previous section's elements.
        self.elements = Some(elements);
        self.pending = Some(section(puller));
    }

    fn open_object(&mut self, section_type: impl Into<String>, path: &[&str]) {
        let header = SectionHeader::new(section_type, path);
        self.open_section(|element| Section::object(header, element));
    }

    fn finish_object(&mut self) {
        self.elements = None;
        self.pending = None;
    }

    /// Deliver the pending section, if any. A section that cannot be
    /// delivered is dropped, not retried.
    async fn announce_section(&mut self) -> BusResult<()> {
        let Some(section) = self.pending.take() else {
            return Ok(());
        };
        let timer = (self.timers.section)(self.timeout);
        hand_off(&mut self.sections, section, &self.cancel, timer).await
    }
}

impl Drop for StreamSender {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if !std::thread::panicking() {
            warn!("section stream dropped without close");
            return;
        }
        error!("section stream dropped while the handler was panicking");
        match &self.unwind {
            Some(slot) => {
                // Keep the caller's side open until the panic is recorded.
                let (detached, _) = rendezvous::channel();
                slot.park(Parked {
                    sections: std::mem::replace(&mut self.sections, detached),
                    elements: self.elements.take(),
                    terminal: self.terminal.clone(),
                });
            }
            None => self.terminal.set(BusError::HandlerPanic(
                "handler panicked while streaming".to_string(),
            )),
        }
    }
}

/// A stream whose handler panicked, held open until its terminal error is
/// known.
pub(crate) struct Parked {
    sections: Pusher<Section>,
    elements: Option<Pusher<Element>>,
    terminal: TerminalError,
}

/// Per-call holder for a [`Parked`] stream.
///
/// The task running the handler [`release`](Self::release)s it once the
/// handler future has returned or unwound.
#[derive(Clone, Default)]
pub(crate) struct UnwindSlot(Arc<Mutex<Option<Parked>>>);

impl UnwindSlot {
    fn park(&self, parked: Parked) {
        *self.0.lock() = Some(parked);
    }

    pub(crate) fn is_parked(&self) -> bool {
        self.0.lock().is_some()
    }

    /// Record `err` as the parked stream's terminal error, then end the
    /// stream. No-op if nothing is parked.
    pub(crate) fn release(&self, err: BusError) {
        let Some(parked) = self.0.lock().take() else {
            return;
        };
        parked.terminal.set(err);
        drop(parked.elements);
        drop(parked.sections);
    }
}

/// Push `value` to the caller, bounded by `timer` and the caller's token.
///
/// A delivered value still reports `Cancelled` when the token is set, so
/// the handler learns promptly that the caller is gone.
async fn hand_off<T>(
    pusher: &mut Pusher<T>,
    value: T,
    cancel: &CancellationToken,
    timer: BoxFuture,
) -> BusResult<()> {
    let give_up = async {
        tokio::select! {
            _ = cancel.cancelled() => BusError::Cancelled,
            _ = timer => {
                debug!("no consumer within hand-off timeout");
                BusError::NoConsumer
            }
        }
    };
    match pusher.push(value, give_up).await {
        Ok(()) if cancel.is_cancelled() => Err(BusError::Cancelled),
        Ok(()) => Ok(()),
        Err(PushError::Disconnected(_)) => {
            debug!("consumer dropped the stream");
            Err(BusError::NoConsumer)
        }
        Err(PushError::GaveUp(err)) => Err(err),
    }
}

#[track_caller]
fn contract_violation(msg: &str) -> ! {
    panic!("contract violation: {msg}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (StreamSender, SectionStream) {
        channel(
            CancellationToken::new(),
            Duration::from_secs(1),
            Timers::default(),
            ResponseMeta::json(200),
            None,
        )
    }

    #[tokio::test]
    #[should_panic(expected = "contract violation")]
    async fn element_without_section_panics() {
        let (mut rs, _sections) = pair();
        let _ = rs.send_element("", &1).await;
    }

    #[tokio::test]
    #[should_panic(expected = "contract violation")]
    async fn element_after_object_section_panics() {
        let (mut rs, _sections) = pair();
        // Nil object: nothing is announced, so no consumer is needed.
        rs.object_section("", &[], &None::<u8>).await.unwrap();
        let _ = rs.send_element("", &1).await;
    }

    #[tokio::test]
    #[should_panic(expected = "contract violation")]
    async fn unencodable_element_without_section_panics() {
        let (mut rs, _sections) = pair();
        let bad: std::collections::BTreeMap<(u8, u8), u8> = [((1, 2), 3)].into();
        let _ = rs.send_element("", &bad).await;
    }

    #[tokio::test]
    async fn nil_element_without_section_is_ignored() {
        let (mut rs, _sections) = pair();
        rs.send_element("", &None::<u8>).await.unwrap();
    }

    #[tokio::test]
    async fn marshal_error_keeps_section_open() {
        let (mut rs, mut sections) = pair();
        let bad: std::collections::BTreeMap<(u8, u8), u8> = [((1, 2), 3)].into();
        let producer = tokio::spawn(async move {
            rs.start_array_section("", &[]);
            assert!(matches!(
                rs.send_element("", &bad).await,
                Err(BusError::Marshal(_))
            ));
            rs.send_element("", &7).await.unwrap();
            rs.close(None);
        });

        let cancel = CancellationToken::new();
        let array = sections.next(&cancel).await.unwrap().into_array().unwrap();
        assert_eq!(array.next(&cancel).await.as_deref(), Some(&b"7"[..]));
        assert_eq!(array.next(&cancel).await, None);
        producer.await.unwrap();
        assert!(sections.next(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn empty_section_is_never_announced() {
        let (mut rs, mut sections) = pair();
        rs.start_array_section("empty", &[]);
        rs.start_map_section("also-empty", &[]);
        rs.close(None);
        assert!(sections.next(&CancellationToken::new()).await.is_none());
        assert!(sections.terminal_error().is_none());
    }

    #[tokio::test]
    async fn drop_without_close_ends_stream_cleanly() {
        let (mut rs, mut sections) = pair();
        rs.start_array_section("", &[]);
        drop(rs);
        assert!(sections.next(&CancellationToken::new()).await.is_none());
        assert!(sections.terminal_error().is_none());
    }

    #[test]
    fn released_stream_records_panic_message() {
        let slot = UnwindSlot::default();
        let (mut rs, mut sections) = channel(
            CancellationToken::new(),
            Duration::from_secs(1),
            Timers::default(),
            ResponseMeta::json(200),
            Some(slot.clone()),
        );
        rs.start_array_section("", &[]);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _rs = rs;
            panic!("mid-stream");
        }));
        let payload = unwound.unwrap_err();
        assert!(slot.is_parked());
        assert!(sections.terminal_slot().get().is_none());

        slot.release(BusError::from_panic(payload));
        assert!(!slot.is_parked());
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        assert!(runtime.block_on(sections.next(&CancellationToken::new())).is_none());
        assert_eq!(
            sections.terminal_error().map(ToString::to_string).as_deref(),
            Some("mid-stream")
        );
    }
}
