//! non blocking content codec interface supplied by the reactor.
//!
//! The reactor owns the byte level http codec. What this crate sees of it are two
//! incremental, never blocking endpoints: a decoder producing request entity bytes
//! and an encoder consuming response entity bytes, both honoring whatever transfer
//! coding frames the message on the wire.

use std::io;

/// Decoder end of an inbound request entity.
pub trait ContentDecoder {
    /// Transfer as many decoded entity bytes as currently available into `dst`.
    /// Returns the number of bytes written. `Ok(0)` means no bytes are available
    /// right now. end of entity is reported through [is_completed](Self::is_completed).
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize>;

    /// true once the decoder has seen the end of the entity.
    fn is_completed(&self) -> bool;
}

/// Encoder end of an outbound response entity.
pub trait ContentEncoder {
    /// Transfer bytes from `src` into the encoder without blocking. Returns the
    /// number of bytes accepted. `Ok(0)` means the encoder can take no more for now.
    fn write(&mut self, src: &[u8]) -> io::Result<usize>;

    /// Mark the entity complete, emitting any end of entity framing.
    fn complete(&mut self) -> io::Result<()>;

    /// true once [complete](Self::complete) has been observed.
    fn is_completed(&self) -> bool;
}
