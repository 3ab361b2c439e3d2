//! reactor connection contracts and the per connection state record.

use core::fmt;

use std::{
    io,
    sync::{Condvar, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::{
    body::BodySize,
    buffer::{SharedInputBuffer, SharedOutputBuffer},
    context::Context,
    error::{self, Error},
    http::{Request, Response},
};

/// Per connection interest control handle into the reactor. Used by the shared
/// buffers to start and stop socket polling as they fill and drain. The buffers
/// hold it weakly: signalling a connection the reactor already dropped is a no op.
pub trait IoControl: Send + Sync {
    /// poll the socket for readability again.
    fn request_input(&self);

    /// stop polling the socket for readability.
    fn suspend_input(&self);

    /// poll the socket for writability.
    fn request_output(&self);

    /// stop polling the socket for writability.
    fn suspend_output(&self);
}

/// Server side of a reactor managed http/1 connection, as seen by the service
/// handler. One instance per live connection, shared with the worker thread
/// servicing it.
pub trait ServerConnection: IoControl {
    /// connection scoped attribute table.
    fn context(&self) -> &Context;

    /// Take the head of the most recently decoded request.
    fn take_request(&self) -> Option<Request<()>>;

    /// Hand a committed response head to the reactor for encoding. The [BodySize]
    /// in the body slot tells the reactor whether entity bytes follow through the
    /// shared output buffer.
    fn submit_response(&self, response: Response<BodySize>) -> Result<(), Error>;

    /// true while a submitted response has not cleared the wire.
    fn is_response_submitted(&self) -> bool;

    /// Discard undelivered request entity bytes held on the reactor side.
    fn reset_input(&self);

    /// Graceful close once pending output has been flushed.
    fn close(&self);

    /// Immediate teardown.
    fn shutdown(&self);
}

/// progress of the inbound half of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputState {
    Ready,
    RequestReceived,
    BodyStream,
    BodyDone,
    Shutdown,
}

/// progress of the outbound half of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Ready,
    ResponseSent,
    BodyStream,
    BodyDone,
    Shutdown,
}

/// Per connection record coupling the reactor callbacks with the worker servicing
/// the connection: the two shared content buffers plus a mutex/condvar guarded
/// state pair used for the cross thread handoff.
///
/// The mutex is contended only at state transition boundaries. byte movement goes
/// through the buffers' own synchronization and must never happen while a worker
/// holds this lock.
pub struct ConnState {
    inbuf: SharedInputBuffer,
    outbuf: SharedOutputBuffer,
    inner: Mutex<StateInner>,
    cond: Condvar,
}

pub(crate) struct StateInner {
    pub(crate) input: InputState,
    pub(crate) output: OutputState,
    pub(crate) request: Option<Request<()>>,
    pub(crate) response: Option<Response<BodySize>>,
    // reuse decision recorded when the response is submitted, consulted when its
    // entity completes on the wire.
    pub(crate) keep_alive: bool,
}

impl ConnState {
    pub(crate) fn new(capacity: usize, io: Weak<dyn IoControl + Send + Sync>) -> Self {
        Self {
            inbuf: SharedInputBuffer::new(capacity, io.clone()),
            outbuf: SharedOutputBuffer::new(capacity, io),
            inner: Mutex::new(StateInner {
                input: InputState::Ready,
                output: OutputState::Ready,
                request: None,
                response: None,
                keep_alive: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn input_state(&self) -> InputState {
        self.lock().input
    }

    pub fn output_state(&self) -> OutputState {
        self.lock().output
    }

    pub(crate) fn input_buffer(&self) -> &SharedInputBuffer {
        &self.inbuf
    }

    pub(crate) fn output_buffer(&self) -> &SharedOutputBuffer {
        &self.outbuf
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, StateInner>) -> MutexGuard<'a, StateInner> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// wake every thread parked on a state transition.
    pub(crate) fn broadcast(&self) {
        self.cond.notify_all();
    }

    /// Park the calling worker until the output state satisfies `done` or the
    /// connection shuts down.
    pub(crate) fn wait_output<F>(&self, mut done: F) -> io::Result<()>
    where
        F: FnMut(OutputState) -> bool,
    {
        let mut guard = self.lock();
        loop {
            if guard.output == OutputState::Shutdown {
                return Err(error::interrupted());
            }
            if done(guard.output) {
                return Ok(());
            }
            guard = self.wait(guard);
        }
    }

    pub(crate) fn reset_input(&self, inner: &mut StateInner) {
        inner.request = None;
        inner.input = InputState::Ready;
        self.inbuf.reset();
    }

    pub(crate) fn reset_output(&self, inner: &mut StateInner) {
        inner.response = None;
        inner.keep_alive = false;
        inner.output = OutputState::Ready;
        self.outbuf.reset();
    }

    /// Move both halves to Shutdown and release every buffer and state waiter.
    /// Terminal: no state leaves Shutdown afterwards.
    pub(crate) fn shutdown(&self) {
        self.inbuf.shutdown();
        self.outbuf.shutdown();
        let mut inner = self.lock();
        inner.input = InputState::Shutdown;
        inner.output = OutputState::Shutdown;
        drop(inner);
        self.broadcast();
    }
}

impl fmt::Debug for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("ConnState")
            .field("input", &inner.input)
            .field("output", &inner.output)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread, time::Duration};

    use crate::buffer::mock::MockIo;

    use super::*;

    fn state() -> Arc<ConnState> {
        let io = MockIo::new();
        let weak: Weak<dyn IoControl + Send + Sync> = Arc::downgrade(&io) as Weak<dyn IoControl + Send + Sync>;
        // keep the control handle alive for the duration of the test.
        std::mem::forget(io);
        Arc::new(ConnState::new(64, weak))
    }

    #[test]
    fn starts_ready() {
        let state = state();
        assert_eq!(state.input_state(), InputState::Ready);
        assert_eq!(state.output_state(), OutputState::Ready);
    }

    #[test]
    fn shutdown_is_terminal() {
        let state = state();
        state.shutdown();
        assert_eq!(state.input_state(), InputState::Shutdown);
        assert_eq!(state.output_state(), OutputState::Shutdown);

        // resets do not leave the terminal state.
        let mut inner = state.lock();
        assert_eq!(inner.output, OutputState::Shutdown);
        drop(inner);
    }

    #[test]
    fn wait_output_observes_transition() {
        let state = state();

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_output(|s| s == OutputState::ResponseSent))
        };

        thread::sleep(Duration::from_millis(50));
        state.lock().output = OutputState::ResponseSent;
        state.broadcast();

        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn wait_output_fails_on_shutdown() {
        let state = state();

        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_output(|s| s == OutputState::ResponseSent))
        };

        thread::sleep(Duration::from_millis(50));
        state.shutdown();

        let err = waiter.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
    }
}
