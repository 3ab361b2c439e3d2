//! request and response entity types bridging blocking handler io and the shared
//! content buffers.

use core::fmt;

use std::{
    io::{self, Read, Write},
    sync::Arc,
};

use bytes::Bytes;

use crate::conn::ConnState;

/// Framing hint carried in the body slot of a committed response head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySize {
    /// No entity follows. Bodyless responses complete as soon as the head is on
    /// the wire.
    None,
    /// Known size entity. streamed through the shared output buffer.
    Sized(usize),
    /// Unknown size entity. streamed through the shared output buffer, framed by
    /// the encoder (chunked on http/1.1, close delimited below).
    Stream,
}

/// Blocking reader over the request entity.
///
/// Handed to request handlers in place of the network facing entity so user code
/// sees an ordinary sequential byte stream. Reads park the worker until the
/// reactor feeds more bytes, return `Ok(0)` at end of entity and fail once the
/// connection shuts down.
pub struct RequestBody(Option<Arc<ConnState>>);

impl RequestBody {
    pub(crate) fn empty() -> Self {
        Self(None)
    }

    pub(crate) fn stream(state: Arc<ConnState>) -> Self {
        Self(Some(state))
    }

    /// true when the request carries no entity.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }
}

impl Read for RequestBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0 {
            Some(ref state) => state.input_buffer().read(buf),
            None => Ok(0),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBody").field("entity", &self.0.is_some()).finish()
    }
}

/// Response entity produced by a request handler.
pub enum ResponseBody {
    None,
    Bytes(Bytes),
    Stream(Box<dyn Read + Send>),
}

impl ResponseBody {
    pub fn size(&self) -> BodySize {
        match *self {
            Self::None => BodySize::None,
            Self::Bytes(ref bytes) => BodySize::Sized(bytes.len()),
            Self::Stream(_) => BodySize::Stream,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(*self, Self::None)
    }

    // stream the entity into the shared output buffer, blocking as it fills.
    pub(crate) fn write_to(self, writer: &mut BodyWriter) -> io::Result<()> {
        match self {
            Self::None => Ok(()),
            Self::Bytes(bytes) => writer.write_all(&bytes),
            Self::Stream(mut read) => io::copy(&mut read, writer).map(drop),
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::None
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(s: &'static str) -> Self {
        Self::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(string: String) -> Self {
        Self::Bytes(Bytes::from(string))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::None => f.write_str("ResponseBody::None"),
            Self::Bytes(ref bytes) => write!(f, "ResponseBody::Bytes({})", bytes.len()),
            Self::Stream(_) => f.write_str("ResponseBody::Stream"),
        }
    }
}

/// Split a finished response into the head committed to the reactor and the entity
/// the worker streams afterwards.
pub(crate) fn split(response: crate::http::Response<ResponseBody>) -> (crate::http::Response<BodySize>, ResponseBody) {
    let (parts, body) = response.into_parts();
    let size = body.size();
    (crate::http::Response::from_parts(parts, size), body)
}

/// Blocking writer over the response entity channel. Writes park the worker while
/// the shared output buffer is full. [finish](Self::finish) flushes and signals end
/// of entity to the reactor side producer.
pub struct BodyWriter {
    state: Arc<ConnState>,
}

impl BodyWriter {
    pub(crate) fn new(state: Arc<ConnState>) -> Self {
        Self { state }
    }

    pub(crate) fn finish(self) {
        self.state.output_buffer().flush();
        self.state.output_buffer().write_completed();
    }
}

impl Write for BodyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.output_buffer().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.output_buffer().flush();
        Ok(())
    }
}

impl fmt::Debug for BodyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyWriter")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn body_sizes() {
        assert_eq!(ResponseBody::None.size(), BodySize::None);
        assert_eq!(ResponseBody::from("hello").size(), BodySize::Sized(5));
        assert_eq!(ResponseBody::Stream(Box::new(io::empty())).size(), BodySize::Stream);
    }

    #[test]
    fn empty_request_body_reads_eof() {
        let mut body = RequestBody::empty();
        let mut dst = [0; 4];
        assert!(body.is_none());
        assert_eq!(body.read(&mut dst).unwrap(), 0);
    }

    #[test]
    fn split_keeps_head_and_entity() {
        let mut response = crate::http::Response::new(ResponseBody::from("hi"));
        response.headers_mut().insert("x-test", "1".parse().unwrap());

        let (head, body) = split(response);
        assert_eq!(*head.body(), BodySize::Sized(2));
        assert!(head.headers().contains_key("x-test"));
        assert_eq!(body.size(), BodySize::Sized(2));
    }
}
