use core::cmp;

use std::{
    io,
    sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak},
};

use bytes::{Buf, BytesMut};

use crate::{codec::ContentEncoder, conn::IoControl, error};

/// Bounded content buffer fed by a worker thread through a blocking write call and
/// drained by the reactor into a response entity encoder.
///
/// The buffer starts in the suspended orientation: the reactor does not poll the
/// socket for writability until the first byte or the completion signal arrives.
/// A worker writing into a full buffer parks until the reactor drains space, which
/// bounds the memory held for any response entity no matter its size.
pub struct SharedOutputBuffer {
    inner: Mutex<Inner>,
    cond: Condvar,
    io: Weak<dyn IoControl + Send + Sync>,
    capacity: usize,
}

struct Inner {
    buf: BytesMut,
    // worker signalled end of entity.
    completed: bool,
    shutdown: bool,
    // reactor output interest is parked and must be requested again.
    suspended: bool,
}

impl SharedOutputBuffer {
    pub(crate) fn new(capacity: usize, io: Weak<dyn IoControl + Send + Sync>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: BytesMut::with_capacity(capacity),
                completed: false,
                shutdown: false,
                suspended: true,
            }),
            cond: Condvar::new(),
            io,
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_io<F>(&self, func: F)
    where
        F: FnOnce(&(dyn IoControl + Send + Sync)),
    {
        if let Some(io) = self.io.upgrade() {
            func(&*io);
        }
    }

    /// Worker side blocking write of the whole slice. Parks the calling thread
    /// whenever the buffer is full until the reactor drains space or the
    /// connection shuts down.
    pub fn write(&self, src: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        let mut inner = self.lock();

        while written < src.len() {
            if inner.shutdown {
                return Err(error::interrupted());
            }
            if inner.completed {
                return Err(io::Error::other("write past end of entity"));
            }

            let space = self.capacity - inner.buf.len();
            if space == 0 {
                inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            let n = cmp::min(space, src.len() - written);
            inner.buf.extend_from_slice(&src[written..written + n]);
            written += n;

            if inner.suspended {
                inner.suspended = false;
                self.with_io(|io| io.request_output());
            }
        }

        Ok(written)
    }

    /// Make sure the reactor has been signalled about pending content. Does not
    /// wait for the buffer to drain.
    pub fn flush(&self) {
        let mut inner = self.lock();
        if inner.shutdown {
            return;
        }
        if inner.suspended && (!inner.buf.is_empty() || inner.completed) {
            inner.suspended = false;
            self.with_io(|io| io.request_output());
        }
    }

    /// Worker signals end of entity. The reactor completes the encoder once the
    /// remaining content has drained.
    pub fn write_completed(&self) {
        let mut inner = self.lock();
        if inner.shutdown || inner.completed {
            return;
        }
        inner.completed = true;
        if inner.suspended {
            inner.suspended = false;
            self.with_io(|io| io.request_output());
        }
    }

    /// Reactor side. Move as many buffered bytes as the encoder accepts. Completes
    /// the encoder once the buffer drained after end of entity, parks output
    /// interest when drained without one. Returns the number of bytes transferred.
    /// Never blocks.
    pub fn produce_content(&self, encoder: &mut dyn ContentEncoder) -> io::Result<usize> {
        let mut inner = self.lock();

        if inner.shutdown {
            return Err(error::interrupted());
        }

        let mut total = 0;
        while !inner.buf.is_empty() {
            match encoder.write(&inner.buf)? {
                0 => break,
                n => {
                    inner.buf.advance(n);
                    total += n;
                }
            }
        }

        if inner.buf.is_empty() {
            if inner.completed {
                if !encoder.is_completed() {
                    encoder.complete()?;
                }
            } else if !inner.suspended {
                inner.suspended = true;
                self.with_io(|io| io.suspend_output());
            }
        }

        if total > 0 {
            self.cond.notify_all();
        }

        Ok(total)
    }

    /// Return to the empty suspended state for the next response on the connection.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.shutdown {
            return;
        }
        inner.buf.clear();
        inner.completed = false;
        inner.suspended = true;
    }

    /// Wake every blocked writer. subsequent operations fail as interrupted.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.shutdown = true;
        drop(inner);
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Weak, atomic::Ordering},
        thread,
        time::Duration,
    };

    use crate::buffer::mock::MockIo;

    use super::*;

    struct StubEncoder {
        data: Vec<u8>,
        // bytes accepted per write call. simulates partial socket drains.
        quota: usize,
        completed: bool,
    }

    impl StubEncoder {
        fn new(quota: usize) -> Self {
            Self {
                data: Vec::new(),
                quota,
                completed: false,
            }
        }
    }

    impl ContentEncoder for StubEncoder {
        fn write(&mut self, src: &[u8]) -> io::Result<usize> {
            let n = cmp::min(self.quota, src.len());
            self.data.extend_from_slice(&src[..n]);
            Ok(n)
        }

        fn complete(&mut self) -> io::Result<()> {
            self.completed = true;
            Ok(())
        }

        fn is_completed(&self) -> bool {
            self.completed
        }
    }

    fn buffer(capacity: usize) -> (Arc<MockIo>, SharedOutputBuffer) {
        let io = MockIo::new();
        let weak: Weak<dyn IoControl + Send + Sync> = Arc::downgrade(&io) as Weak<dyn IoControl + Send + Sync>;
        (io, SharedOutputBuffer::new(capacity, weak))
    }

    #[test]
    fn first_write_requests_output() {
        let (io, buf) = buffer(16);

        buf.write(b"hi").unwrap();
        assert_eq!(io.request_output.load(Ordering::SeqCst), 1);

        // already signalled. no repeat until the reactor parks interest again.
        buf.write(b"ho").unwrap();
        assert_eq!(io.request_output.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn produce_drains_in_order() {
        let (_io, buf) = buffer(16);
        buf.write(b"hello world").unwrap();

        let mut encoder = StubEncoder::new(4);
        let n = buf.produce_content(&mut encoder).unwrap();
        assert_eq!(n, 11);
        assert_eq!(encoder.data, b"hello world");
        assert!(!encoder.completed);
    }

    #[test]
    fn drained_without_completion_suspends_output() {
        let (io, buf) = buffer(16);
        buf.write(b"x").unwrap();

        let mut encoder = StubEncoder::new(usize::MAX);
        buf.produce_content(&mut encoder).unwrap();
        assert_eq!(io.suspend_output.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_completes_encoder_after_drain() {
        let (io, buf) = buffer(16);
        buf.write(b"done").unwrap();
        buf.write_completed();

        let mut encoder = StubEncoder::new(usize::MAX);
        buf.produce_content(&mut encoder).unwrap();
        assert!(encoder.completed);
        assert_eq!(encoder.data, b"done");
        assert_eq!(io.suspend_output.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_completion_still_signals_reactor() {
        let (io, buf) = buffer(16);
        buf.write_completed();
        assert_eq!(io.request_output.load(Ordering::SeqCst), 1);

        let mut encoder = StubEncoder::new(usize::MAX);
        buf.produce_content(&mut encoder).unwrap();
        assert!(encoder.completed);
    }

    #[test]
    fn write_blocks_on_full_until_drained() {
        let (_io, buf) = buffer(4);
        let buf = Arc::new(buf);
        buf.write(b"aaaa").unwrap();

        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write(b"bb").unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        let mut encoder = StubEncoder::new(usize::MAX);
        buf.produce_content(&mut encoder).unwrap();

        assert_eq!(writer.join().unwrap(), 2);
        buf.produce_content(&mut encoder).unwrap();
        assert_eq!(encoder.data, b"aaaabb");
    }

    #[test]
    fn shutdown_wakes_blocked_writer() {
        let (_io, buf) = buffer(2);
        let buf = Arc::new(buf);
        buf.write(b"xx").unwrap();

        let writer = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || buf.write(b"y").unwrap_err())
        };

        thread::sleep(Duration::from_millis(50));
        buf.shutdown();

        let err = writer.join().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn write_after_completion_is_rejected() {
        let (_io, buf) = buffer(8);
        buf.write_completed();
        assert!(buf.write(b"late").is_err());
    }

    #[test]
    fn reset_restores_suspended_orientation() {
        let (io, buf) = buffer(8);
        buf.write(b"one").unwrap();
        let mut encoder = StubEncoder::new(usize::MAX);
        buf.write_completed();
        buf.produce_content(&mut encoder).unwrap();

        buf.reset();
        assert!(buf.is_empty());
        assert!(!buf.is_completed());

        // next response signals anew.
        buf.write(b"two").unwrap();
        assert_eq!(io.request_output.load(Ordering::SeqCst), 2);
    }
}
