//! Sections and elements as seen by the caller.
//!
//! A streamed reply is a [`SectionStream`] of [`Section`]s. Each section
//! is typed and path-addressed and carries its own element stream:
//!
//! - [`ArraySection`] yields unnamed values,
//! - [`MapSection`] yields `(name, value)` pairs,
//! - [`ObjectSection`] yields exactly one value.
//!
//! Every pull is a rendezvous with the producer: nothing is buffered, and
//! the producer gives up with [`BusError::NoConsumer`] if the caller does
//! not pull within the hand-off timeout.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BusError;
use crate::rendezvous::Puller;
use crate::response::ResponseMeta;

/// One unit of data inside a section. `name` is empty for array and
/// object sections and holds the key for map sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub value: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Array,
    Map,
    Object,
}

#[derive(Debug, Clone)]
pub(crate) struct SectionHeader {
    pub(crate) section_type: String,
    pub(crate) path: Vec<String>,
}

impl SectionHeader {
    pub(crate) fn new(section_type: impl Into<String>, path: &[&str]) -> Self {
        Self {
            section_type: section_type.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Wait for the next element unless the caller has cancelled.
///
/// An element that arrives while the token is already cancelled is
/// discarded: end of stream and cancellation look the same to iterators.
async fn receive(elements: &Puller<Element>, cancel: &CancellationToken) -> Option<Element> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        element = elements.pull() => element.filter(|_| !cancel.is_cancelled()),
    }
}

#[derive(Debug)]
pub struct ArraySection {
    header: SectionHeader,
    elements: Puller<Element>,
}

impl ArraySection {
    pub fn section_type(&self) -> &str {
        &self.header.section_type
    }

    pub fn path(&self) -> &[String] {
        &self.header.path
    }

    /// Next value, or `None` at end of section or on cancellation.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<Bytes> {
        receive(&self.elements, cancel).await.map(|e| e.value)
    }
}

#[derive(Debug)]
pub struct MapSection {
    header: SectionHeader,
    elements: Puller<Element>,
}

impl MapSection {
    pub fn section_type(&self) -> &str {
        &self.header.section_type
    }

    pub fn path(&self) -> &[String] {
        &self.header.path
    }

    /// Next `(name, value)` pair, or `None` at end of section or on
    /// cancellation.
    pub async fn next(&self, cancel: &CancellationToken) -> Option<(String, Bytes)> {
        receive(&self.elements, cancel)
            .await
            .map(|e| (e.name, e.value))
    }
}

#[derive(Debug)]
pub struct ObjectSection {
    header: SectionHeader,
    element: Puller<Element>,
    received: bool,
}

impl ObjectSection {
    pub fn section_type(&self) -> &str {
        &self.header.section_type
    }

    pub fn path(&self) -> &[String] {
        &self.header.path
    }

    /// The section's single value. Draining: the first successful call
    /// returns it, every later call returns `None`.
    pub async fn value(&mut self, cancel: &CancellationToken) -> Option<Bytes> {
        if self.received {
            return None;
        }
        let element = receive(&self.element, cancel).await?;
        self.received = true;
        Some(element.value)
    }
}

/// A typed, path-addressed chunk of a streamed reply.
#[derive(Debug)]
pub enum Section {
    Array(ArraySection),
    Map(MapSection),
    Object(ObjectSection),
}

impl Section {
    pub(crate) fn array(header: SectionHeader, elements: Puller<Element>) -> Self {
        Self::Array(ArraySection { header, elements })
    }

    pub(crate) fn map(header: SectionHeader, elements: Puller<Element>) -> Self {
        Self::Map(MapSection { header, elements })
    }

    pub(crate) fn object(header: SectionHeader, element: Puller<Element>) -> Self {
        Self::Object(ObjectSection {
            header,
            element,
            received: false,
        })
    }

    fn header(&self) -> &SectionHeader {
        match self {
            Self::Array(s) => &s.header,
            Self::Map(s) => &s.header,
            Self::Object(s) => &s.header,
        }
    }

    pub fn kind(&self) -> SectionKind {
        match self {
            Self::Array(_) => SectionKind::Array,
            Self::Map(_) => SectionKind::Map,
            Self::Object(_) => SectionKind::Object,
        }
    }

    pub fn section_type(&self) -> &str {
        &self.header().section_type
    }

    pub fn path(&self) -> &[String] {
        &self.header().path
    }

    pub fn into_array(self) -> Option<ArraySection> {
        match self {
            Self::Array(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<MapSection> {
        match self {
            Self::Map(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<ObjectSection> {
        match self {
            Self::Object(s) => Some(s),
            _ => None,
        }
    }
}

/// Write-once slot for the error a stream was closed with.
///
/// The producer fills it before ending the section sequence, so once the
/// caller has seen the end of the stream the slot holds its final value.
#[derive(Clone, Default)]
pub struct TerminalError(Arc<OnceLock<BusError>>);

impl TerminalError {
    pub(crate) fn set(&self, err: BusError) {
        if let Err(err) = self.0.set(err) {
            debug!(error = %err, "terminal error already recorded, dropping");
        }
    }

    pub fn get(&self) -> Option<&BusError> {
        self.0.get()
    }
}

impl fmt::Debug for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TerminalError").field(&self.get()).finish()
    }
}

/// Caller side of a streamed reply.
///
/// Must be read to the end. [`terminal_error`](Self::terminal_error) is
/// only meaningful after [`next`](Self::next) has returned `None`.
#[derive(Debug)]
pub struct SectionStream {
    sections: Puller<Section>,
    terminal: TerminalError,
    meta: ResponseMeta,
    drained: bool,
}

impl SectionStream {
    pub(crate) fn new(sections: Puller<Section>, terminal: TerminalError, meta: ResponseMeta) -> Self {
        Self {
            sections,
            terminal,
            meta,
            drained: false,
        }
    }

    /// Next section in the order the handler started them.
    ///
    /// `None` once the handler has closed the stream, or when `cancel`
    /// fires. Only the former drains the stream.
    pub async fn next(&mut self, cancel: &CancellationToken) -> Option<Section> {
        if self.drained {
            return None;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            section = self.sections.pull() => match section {
                Some(section) if cancel.is_cancelled() => {
                    debug!(section_type = section.section_type(), "section discarded after cancellation");
                    None
                }
                Some(section) => Some(section),
                None => {
                    self.drained = true;
                    None
                }
            },
        }
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    /// The error the handler closed the stream with, if any.
    pub fn terminal_error(&self) -> Option<&BusError> {
        if !self.drained {
            debug!("terminal error read before the section stream was drained");
            return None;
        }
        self.terminal.get()
    }

    /// Shared handle to the terminal error slot, for use after
    /// [`into_stream`](Self::into_stream) has consumed `self`.
    pub fn terminal_slot(&self) -> TerminalError {
        self.terminal.clone()
    }

    /// Adapt into a `Stream` of sections that ends on close or when
    /// `cancel` fires.
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = Section> + Send {
        futures_util::stream::unfold((self, cancel), |(mut stream, cancel)| async move {
            let section = stream.next(&cancel).await?;
            Some((section, (stream, cancel)))
        })
    }
}
