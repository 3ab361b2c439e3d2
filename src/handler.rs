//! reactor facing service handler and the worker side request routine.

use std::sync::{Arc, Weak};

use tracing::{error, trace};

use crate::{
    body::{self, BodySize, BodyWriter, RequestBody, ResponseBody},
    codec::{ContentDecoder, ContentEncoder},
    config::ServiceConfig,
    conn::{ConnState, InputState, IoControl, OutputState, ServerConnection},
    context::{CONN_STATE, HTTP_REQUEST},
    error::{self, Error, ProtoError},
    executor::{Executor, ThreadPoolExecutor},
    http::{
        self, Response, StatusCode, Version,
        const_header_value::TEXT_ASCII,
        header::{CONTENT_TYPE, HeaderValue},
    },
    pipeline::Pipeline,
    service::{ConnReuseStrategy, DefaultConnReuse, EventListener, ExpectationVerifier, HandlerResolver},
};

/// Reactor callback surface of a server side http/1 connection.
///
/// The reactor invokes these from its event loop thread and serializes them per
/// connection. None of them may block: byte movement performed here goes through
/// the non blocking ends of the shared buffers only.
pub trait EventHandler<C>
where
    C: ServerConnection + Send + Sync + 'static,
{
    /// a new connection became active.
    fn connected(&self, conn: &Arc<C>);

    /// a request head has been fully decoded.
    fn request_received(&self, conn: &Arc<C>);

    /// decoded request entity bytes are available from `decoder`.
    fn input_ready(&self, conn: &Arc<C>, decoder: &mut dyn ContentDecoder);

    /// the connection is able to accept a response head.
    fn response_ready(&self, conn: &Arc<C>);

    /// the connection is able to emit response entity bytes into `encoder`.
    fn output_ready(&self, conn: &Arc<C>, encoder: &mut dyn ContentEncoder);

    /// an http protocol failure was detected by the reactor or codec.
    fn exception(&self, conn: &Arc<C>, error: ProtoError);

    /// the connection is gone.
    fn closed(&self, conn: &Arc<C>);
}

/// Service handler bridging reactor events to blocking request handlers.
///
/// Each connection gets a [ConnState] attached to its context on `connected`.
/// `request_received` dispatches a worker task that services the request with
/// ordinary blocking stream io while the reactor callbacks keep feeding and
/// draining the connection's shared buffers. At most one request is in flight per
/// connection.
pub struct ServiceHandler {
    core: Arc<Core>,
}

struct Core {
    config: ServiceConfig,
    pipeline: Pipeline,
    resolver: Option<Box<dyn HandlerResolver>>,
    verifier: Option<Box<dyn ExpectationVerifier>>,
    reuse: Box<dyn ConnReuseStrategy>,
    listener: Option<Box<dyn EventListener>>,
    executor: Box<dyn Executor>,
}

/// server token announced by the default pipeline.
#[allow(clippy::declare_interior_mutable_const)]
const SERVER_TOKEN: HeaderValue = HeaderValue::from_static(concat!("http-bridge/", env!("CARGO_PKG_VERSION")));

impl ServiceHandler {
    pub fn builder() -> ServiceHandlerBuilder {
        ServiceHandlerBuilder {
            config: ServiceConfig::new(),
            pipeline: Pipeline::server(SERVER_TOKEN),
            resolver: None,
            verifier: None,
            reuse: Box::new(DefaultConnReuse),
            listener: None,
            executor: None,
        }
    }
}

pub struct ServiceHandlerBuilder {
    config: ServiceConfig,
    pipeline: Pipeline,
    resolver: Option<Box<dyn HandlerResolver>>,
    verifier: Option<Box<dyn ExpectationVerifier>>,
    reuse: Box<dyn ConnReuseStrategy>,
    listener: Option<Box<dyn EventListener>>,
    executor: Option<Box<dyn Executor>>,
}

impl ServiceHandlerBuilder {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the standard outbound interceptor chain the handler is built with.
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Handler resolver servicing request uris. Without one every request is
    /// answered with `501 Not Implemented`.
    pub fn resolver<R>(mut self, resolver: R) -> Self
    where
        R: HandlerResolver + 'static,
    {
        self.resolver = Some(Box::new(resolver));
        self
    }

    pub fn expectation_verifier<V>(mut self, verifier: V) -> Self
    where
        V: ExpectationVerifier + 'static,
    {
        self.verifier = Some(Box::new(verifier));
        self
    }

    pub fn reuse_strategy<S>(mut self, strategy: S) -> Self
    where
        S: ConnReuseStrategy + 'static,
    {
        self.reuse = Box::new(strategy);
        self
    }

    pub fn event_listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    pub fn executor<E>(mut self, executor: E) -> Self
    where
        E: Executor + 'static,
    {
        self.executor = Some(Box::new(executor));
        self
    }

    pub fn finish(self) -> ServiceHandler {
        ServiceHandler {
            core: Arc::new(Core {
                config: self.config,
                pipeline: self.pipeline,
                resolver: self.resolver,
                verifier: self.verifier,
                reuse: self.reuse,
                listener: self.listener,
                executor: self.executor.unwrap_or_else(|| Box::new(ThreadPoolExecutor::default())),
            }),
        }
    }
}

impl<C> EventHandler<C> for ServiceHandler
where
    C: ServerConnection + Send + Sync + 'static,
{
    fn connected(&self, conn: &Arc<C>) {
        let io: Weak<dyn IoControl + Send + Sync> = Arc::downgrade(conn) as Weak<dyn IoControl + Send + Sync>;
        let state = Arc::new(ConnState::new(self.core.config.content_buffer_size, io));
        conn.context().insert(CONN_STATE, state);

        trace!(target: "service_handler", "connection open");
        if let Some(listener) = self.core.listener.as_deref() {
            listener.connection_open();
        }
    }

    fn request_received(&self, conn: &Arc<C>) {
        let Some(state) = state_of(conn.as_ref()) else { return };
        let Some(request) = conn.take_request() else { return };

        {
            let mut inner = state.lock();
            if inner.input == InputState::Shutdown {
                return;
            }
            let entity = http::is_entity_enclosing(&request);
            inner.input = InputState::RequestReceived;
            inner.request = Some(request);
            // no body reads are expected. stop polling until the next request.
            if !entity {
                conn.suspend_input();
            }
        }
        state.broadcast();

        let core = Arc::clone(&self.core);
        let conn = Arc::clone(conn);
        self.core
            .executor
            .execute(Box::new(move || handle_request(&core, &state, &conn)));
    }

    fn input_ready(&self, conn: &Arc<C>, decoder: &mut dyn ContentDecoder) {
        let Some(state) = state_of(conn.as_ref()) else { return };

        let result = {
            let mut inner = state.lock();
            match state.input_buffer().consume_content(decoder) {
                Ok(_) => {
                    inner.input = if decoder.is_completed() {
                        InputState::BodyDone
                    } else {
                        InputState::BodyStream
                    };
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        state.broadcast();

        if let Err(e) = result {
            fatal_io(&self.core, conn.as_ref(), &state, e);
        }
    }

    fn response_ready(&self, conn: &Arc<C>) {
        let Some(state) = state_of(conn.as_ref()) else { return };

        let result = try_submit(&self.core, conn, &state);
        state.broadcast();

        if let Err(e) = result {
            dispatch_fatal(&self.core, conn.as_ref(), &state, e);
        }
    }

    fn output_ready(&self, conn: &Arc<C>, encoder: &mut dyn ContentEncoder) {
        let Some(state) = state_of(conn.as_ref()) else { return };

        let result = {
            let mut inner = state.lock();
            match state.output_buffer().produce_content(encoder) {
                Ok(_) => {
                    if encoder.is_completed() {
                        inner.output = OutputState::BodyDone;
                        let reuse = inner.keep_alive;
                        state.reset_output(&mut inner);
                        state.reset_input(&mut inner);
                        if reuse {
                            conn.request_input();
                        } else {
                            conn.close();
                        }
                    } else {
                        inner.output = OutputState::BodyStream;
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        };
        state.broadcast();

        if let Err(e) = result {
            fatal_io(&self.core, conn.as_ref(), &state, e);
        }
    }

    fn exception(&self, conn: &Arc<C>, error: ProtoError) {
        let Some(state) = state_of(conn.as_ref()) else { return };
        trace!(target: "service_handler", "protocol exception: {}", error);

        // no worker exists to stream an entity for this response so it stays bare.
        let mut response = response_with(Version::HTTP_10, error.status());
        let result = self
            .core
            .pipeline
            .process_response(&mut response, conn.context())
            .map_err(Error::Proto)
            .and_then(|_| {
                let (head, _) = body::split(response);
                {
                    let mut inner = state.lock();
                    if inner.output == OutputState::Shutdown {
                        return Ok(());
                    }
                    inner.response = Some(head);
                }
                conn.request_output();
                Ok(())
            });
        state.broadcast();

        if let Err(e) = result {
            dispatch_fatal(&self.core, conn.as_ref(), &state, e);
        }
    }

    fn closed(&self, conn: &Arc<C>) {
        // take the record out so a repeated notification is a no op.
        if let Some(state) = conn.context().remove::<Arc<ConnState>>(CONN_STATE) {
            state.shutdown();
            trace!(target: "service_handler", "connection closed");
            if let Some(listener) = self.core.listener.as_deref() {
                listener.connection_closed();
            }
        }
    }
}

fn state_of<C>(conn: &C) -> Option<Arc<ConnState>>
where
    C: ServerConnection,
{
    conn.context().get::<Arc<ConnState>>(CONN_STATE)
}

// submit a staged response once the output channel is ready for it. bodyless final
// responses complete right here: reset and either accept the next request or close.
fn try_submit<C>(core: &Core, conn: &Arc<C>, state: &ConnState) -> Result<(), Error>
where
    C: ServerConnection + Send + Sync + 'static,
{
    let mut inner = state.lock();

    if inner.output != OutputState::Ready || conn.is_response_submitted() {
        return Ok(());
    }
    let Some(response) = inner.response.take() else {
        return Ok(());
    };

    let status = response.status();
    let bodyless = *response.body() == BodySize::None;
    let reuse = core.reuse.keep_alive(&response, conn.context());
    conn.submit_response(response)?;

    if status.as_u16() >= 200 && bodyless {
        state.reset_output(&mut inner);
        state.reset_input(&mut inner);
        if reuse {
            conn.request_input();
        } else {
            conn.close();
        }
    } else {
        inner.keep_alive = reuse;
        inner.output = OutputState::ResponseSent;
    }

    Ok(())
}

fn response_with(version: Version, status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::None);
    *response.version_mut() = version;
    *response.status_mut() = status;
    response
}

// total by construction. this is the last line of defense before fatal shutdown.
fn map_error(response: &mut Response<ResponseBody>, error: &ProtoError) {
    *response.status_mut() = error.status();
    response.headers_mut().insert(CONTENT_TYPE, TEXT_ASCII);
    *response.body_mut() = ResponseBody::from(error.to_string());
}

/// Worker thread body servicing one request.
///
/// Coordinates the `100-continue` handshake, runs the interceptor pipeline,
/// invokes the resolved handler and streams the response entity into the shared
/// output buffer. A shutdown wake anywhere in here is a clean early exit.
fn handle_request<C>(core: &Core, state: &Arc<ConnState>, conn: &Arc<C>)
where
    C: ServerConnection + Send + Sync + 'static,
{
    if let Err(e) = try_handle_request(core, state, conn) {
        dispatch_fatal(core, conn.as_ref(), state, e);
    }
}

fn try_handle_request<C>(core: &Core, state: &Arc<ConnState>, conn: &Arc<C>) -> Result<(), Error>
where
    C: ServerConnection + Send + Sync + 'static,
{
    // a previous response may still be draining. the connection accepts one
    // request at a time.
    state.wait_output(|output| output == OutputState::Ready)?;

    let Some(head) = state.lock().request.take() else {
        return Ok(());
    };

    let version = http::downgrade(head.version());
    let entity_enclosing = http::is_entity_enclosing(&head);
    conn.context().insert(HTTP_REQUEST, http::RequestLine::new(&head));
    let mut rejected = None;

    if entity_enclosing && http::expect_continue(&head) {
        let mut ack = response_with(version, StatusCode::CONTINUE);
        if let Some(verifier) = core.verifier.as_deref() {
            if let Err(e) = verifier.verify(&head, &mut ack, conn.context()) {
                ack = response_with(Version::HTTP_10, StatusCode::INTERNAL_SERVER_ERROR);
                map_error(&mut ack, &e);
            }
        }

        if ack.status().as_u16() < 200 {
            // relay the interim response and wait for it to clear the wire before
            // the client starts transmitting the entity.
            let (ack_head, _) = body::split(ack);
            state.lock().response = Some(ack_head);
            conn.request_output();
            state.broadcast();

            state.wait_output(|output| output == OutputState::ResponseSent)?;
            {
                let mut inner = state.lock();
                state.reset_output(&mut inner);
            }
            state.broadcast();
        } else {
            // expectation rejected. the entity is discarded unseen.
            conn.reset_input();
            rejected = Some(ack);
        }
    }

    let wrap_entity = entity_enclosing && rejected.is_none();
    let mut request = head.map(|_| {
        if wrap_entity {
            RequestBody::stream(Arc::clone(state))
        } else {
            RequestBody::empty()
        }
    });

    let mut response = match rejected {
        Some(response) => response,
        None => {
            let mut response = response_with(version, StatusCode::OK);
            let serviced = core
                .pipeline
                .process_request(&mut request, conn.context())
                .and_then(|_| {
                    let handler = core
                        .resolver
                        .as_deref()
                        .and_then(|resolver| resolver.lookup(request.uri().path()));
                    match handler {
                        Some(handler) => handler.handle(&mut request, &mut response, conn.context()),
                        None => {
                            *response.status_mut() = StatusCode::NOT_IMPLEMENTED;
                            Ok(())
                        }
                    }
                });

            if let Err(e) = serviced {
                trace!(target: "service_handler", "request failed: {}", e);
                response = response_with(Version::HTTP_10, StatusCode::INTERNAL_SERVER_ERROR);
                map_error(&mut response, &e);
            }
            response
        }
    };

    core.pipeline
        .process_response(&mut response, conn.context())
        .map_err(Error::Proto)?;

    if !http::can_have_body(request.method(), response.status()) {
        *response.body_mut() = ResponseBody::None;
    }

    let (response_head, entity) = body::split(response);
    state.lock().response = Some(response_head);
    conn.request_output();
    state.broadcast();

    if !entity.is_none() {
        let mut writer = BodyWriter::new(Arc::clone(state));
        entity.write_to(&mut writer)?;
        writer.finish();
    }

    Ok(())
}

fn dispatch_fatal<C>(core: &Core, conn: &C, state: &ConnState, error: Error)
where
    C: ServerConnection,
{
    match error {
        Error::Io(e) => fatal_io(core, conn, state, e),
        Error::Proto(e) => fatal_proto(core, conn, state, e),
    }
}

fn fatal_io<C>(core: &Core, conn: &C, state: &ConnState, e: std::io::Error)
where
    C: ServerConnection,
{
    // shutdown induced wake. the connection is already being torn down.
    if error::is_interrupted(&e) {
        trace!(target: "service_handler", "interrupted by shutdown");
        return;
    }
    shutdown_connection(conn, state);
    error!(target: "service_handler", "fatal i/o error: {}", e);
    if let Some(listener) = core.listener.as_deref() {
        listener.fatal_io_error(&e);
    }
}

fn fatal_proto<C>(core: &Core, conn: &C, state: &ConnState, e: ProtoError)
where
    C: ServerConnection,
{
    shutdown_connection(conn, state);
    error!(target: "service_handler", "fatal protocol error: {}", e);
    if let Some(listener) = core.listener.as_deref() {
        listener.fatal_protocol_error(&e);
    }
}

fn shutdown_connection<C>(conn: &C, state: &ConnState)
where
    C: ServerConnection,
{
    state.shutdown();
    conn.shutdown();
}
