use core::cmp;

use std::{
    io,
    sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak},
};

use bytes::{Buf, BytesMut};

use crate::{codec::ContentDecoder, conn::IoControl, error};

/// Bounded content buffer fed by the reactor from a request entity decoder and
/// drained by a worker thread through a blocking read call.
///
/// When the buffer fills up the reactor is told to stop polling the socket for
/// input. the first worker read that opens space requests it again. Together with
/// the fixed capacity this bounds the memory held for any request entity no matter
/// its size.
pub struct SharedInputBuffer {
    inner: Mutex<Inner>,
    cond: Condvar,
    io: Weak<dyn IoControl + Send + Sync>,
    capacity: usize,
}

struct Inner {
    buf: BytesMut,
    eof: bool,
    shutdown: bool,
    // reactor input interest has been cleared and must be requested again.
    suspended: bool,
}

impl SharedInputBuffer {
    pub(crate) fn new(capacity: usize, io: Weak<dyn IoControl + Send + Sync>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: BytesMut::with_capacity(capacity),
                eof: false,
                shutdown: false,
                suspended: false,
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

    /// Reactor side. Move as many decoded bytes as fit into the buffer. Suspends
    /// reactor input once full and marks end of entity once the decoder completes.
    /// Returns the number of bytes transferred. Never blocks.
    pub fn consume_content(&self, decoder: &mut dyn ContentDecoder) -> io::Result<usize> {
        let mut inner = self.lock();

        if inner.shutdown {
            return Err(error::interrupted());
        }

        let mut total = 0;
        while inner.buf.len() < self.capacity {
            let len = inner.buf.len();
            inner.buf.resize(self.capacity, 0);
            match decoder.read(&mut inner.buf[len..]) {
                Ok(0) => {
                    inner.buf.truncate(len);
                    break;
                }
                Ok(n) => {
                    inner.buf.truncate(len + n);
                    total += n;
                }
                Err(e) => {
                    inner.buf.truncate(len);
                    return Err(e);
                }
            }
        }

        if decoder.is_completed() {
            inner.eof = true;
        }

        if inner.buf.len() == self.capacity && !inner.suspended {
            inner.suspended = true;
            self.with_io(|io| io.suspend_input());
        }

        if total > 0 || inner.eof {
            self.cond.notify_all();
        }

        Ok(total)
    }

    /// Worker side blocking read. Parks the calling thread until bytes are
    /// available, end of entity is reached (`Ok(0)`) or the connection shuts down.
    pub fn read(&self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut inner = self.lock();
        loop {
            if inner.shutdown {
                return Err(error::interrupted());
            }
            if !inner.buf.is_empty() {
                break;
            }
            if inner.eof {
                return Ok(0);
            }
            inner = self.cond.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }

        let n = cmp::min(dst.len(), inner.buf.len());
        dst[..n].copy_from_slice(&inner.buf[..n]);
        inner.buf.advance(n);

        // space opened below capacity. resume reactor input if it was parked.
        if inner.suspended && inner.buf.len() < self.capacity {
            inner.suspended = false;
            self.with_io(|io| io.request_input());
        }

        Ok(n)
    }

    /// Return to the empty accepting state for the next request on the connection.
    pub fn reset(&self) {
        let mut inner = self.lock();
        if inner.shutdown {
            return;
        }
        inner.buf.clear();
        inner.eof = false;
        inner.suspended = false;
    }

    /// Wake every blocked reader. subsequent operations fail as interrupted.
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

    pub fn is_eof(&self) -> bool {
        let inner = self.lock();
        inner.eof && inner.buf.is_empty()
    }
}

#[cfg(test)]
mod test {
    use std::{
        io,
        sync::{Arc, Weak},
        thread,
        time::Duration,
    };

    use crate::buffer::mock::MockIo;
    use crate::conn::IoControl;

    use super::*;

    struct StubDecoder {
        data: Vec<u8>,
        pos: usize,
        // entity ends when all data has been delivered.
        final_chunk: bool,
    }

    impl StubDecoder {
        fn new(data: &[u8], final_chunk: bool) -> Self {
            Self {
                data: data.to_vec(),
                pos: 0,
                final_chunk,
            }
        }
    }

    impl ContentDecoder for StubDecoder {
        fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
            let n = cmp::min(dst.len(), self.data.len() - self.pos);
            dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn is_completed(&self) -> bool {
            self.final_chunk && self.pos == self.data.len()
        }
    }

    fn buffer(capacity: usize) -> (Arc<MockIo>, SharedInputBuffer) {
        let io = MockIo::new();
        let weak: Weak<dyn IoControl + Send + Sync> = Arc::downgrade(&io) as Weak<dyn IoControl + Send + Sync>;
        (io, SharedInputBuffer::new(capacity, weak))
    }

    #[test]
    fn consume_then_read() {
        let (_io, buf) = buffer(16);
        let mut decoder = StubDecoder::new(b"hello", true);

        assert_eq!(buf.consume_content(&mut decoder).unwrap(), 5);
        assert_eq!(buf.len(), 5);

        let mut dst = [0; 16];
        assert_eq!(buf.read(&mut dst).unwrap(), 5);
        assert_eq!(&dst[..5], b"hello");

        // entity complete and drained.
        assert_eq!(buf.read(&mut dst).unwrap(), 0);
        assert!(buf.is_eof());
    }

    #[test]
    fn full_buffer_suspends_and_read_resumes() {
        let (io, buf) = buffer(4);
        let mut decoder = StubDecoder::new(b"abcdef", true);

        assert_eq!(buf.consume_content(&mut decoder).unwrap(), 4);
        assert_eq!(io.suspend_input.load(std::sync::atomic::Ordering::SeqCst), 1);

        let mut dst = [0; 2];
        assert_eq!(buf.read(&mut dst).unwrap(), 2);
        assert_eq!(io.request_input.load(std::sync::atomic::Ordering::SeqCst), 1);

        // remaining decoder bytes fit now.
        assert_eq!(buf.consume_content(&mut decoder).unwrap(), 2);
        assert_eq!(buf.read(&mut dst).unwrap(), 2);
        assert_eq!(buf.read(&mut dst).unwrap(), 2);
        assert_eq!(buf.read(&mut dst).unwrap(), 0);
    }

    #[test]
    fn read_blocks_until_fed() {
        let (_io, buf) = buffer(16);
        let buf = Arc::new(buf);

        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut dst = [0; 4];
                let n = buf.read(&mut dst).unwrap();
                (n, dst)
            })
        };

        thread::sleep(Duration::from_millis(50));
        let mut decoder = StubDecoder::new(b"hi", false);
        buf.consume_content(&mut decoder).unwrap();

        let (n, dst) = reader.join().unwrap();
        assert_eq!(n, 2);
        assert_eq!(&dst[..2], b"hi");
    }

    #[test]
    fn shutdown_wakes_blocked_reader() {
        let (_io, buf) = buffer(16);
        let buf = Arc::new(buf);

        let reader = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut dst = [0; 4];
                buf.read(&mut dst).unwrap_err()
            })
        };

        thread::sleep(Duration::from_millis(50));
        buf.shutdown();

        let err = reader.join().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn reset_clears_content_and_eof() {
        let (_io, buf) = buffer(8);
        let mut decoder = StubDecoder::new(b"data", true);
        buf.consume_content(&mut decoder).unwrap();

        buf.reset();
        assert!(buf.is_empty());
        assert!(!buf.is_eof());
    }

    #[test]
    fn rejects_after_shutdown() {
        let (_io, buf) = buffer(8);
        buf.shutdown();

        let mut decoder = StubDecoder::new(b"data", true);
        let err = buf.consume_content(&mut decoder).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
