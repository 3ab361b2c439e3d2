//! pluggable request servicing policies.

use std::io;

use crate::{
    body::{BodySize, RequestBody, ResponseBody},
    context::Context,
    error::ProtoError,
    http::{Request, Response, Version, header::CONNECTION},
};

/// Synchronous user request handler.
///
/// Runs on a worker thread. The request entity is an ordinary blocking byte stream
/// over the shared input buffer. the handler mutates the response, typically
/// attaching an entity, which is streamed out after the head is committed.
pub trait HttpRequestHandler: Send + Sync {
    fn handle(
        &self,
        request: &mut Request<RequestBody>,
        response: &mut Response<ResponseBody>,
        ctx: &Context,
    ) -> Result<(), ProtoError>;
}

impl<F> HttpRequestHandler for F
where
    F: Fn(&mut Request<RequestBody>, &mut Response<ResponseBody>, &Context) -> Result<(), ProtoError> + Send + Sync,
{
    fn handle(
        &self,
        request: &mut Request<RequestBody>,
        response: &mut Response<ResponseBody>,
        ctx: &Context,
    ) -> Result<(), ProtoError> {
        self(request, response, ctx)
    }
}

/// Maps a request path to the handler servicing it.
pub trait HandlerResolver: Send + Sync {
    fn lookup(&self, path: &str) -> Option<&dyn HttpRequestHandler>;
}

/// Pattern keyed handler registry.
///
/// Recognized patterns: `*` matching everything, exact paths, `prefix*` and
/// `*.suffix`. The longest matching pattern wins, with `*` losing against any
/// other match.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<(String, Box<dyn HttpRequestHandler>)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, pattern: impl Into<String>, handler: H)
    where
        H: HttpRequestHandler + 'static,
    {
        self.handlers.push((pattern.into(), Box::new(handler)));
    }
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" || pattern == path {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        if path.starts_with(prefix) {
            return true;
        }
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        if path.ends_with(suffix) {
            return true;
        }
    }
    false
}

impl HandlerResolver for HandlerRegistry {
    fn lookup(&self, path: &str) -> Option<&dyn HttpRequestHandler> {
        let mut best: Option<&(String, Box<dyn HttpRequestHandler>)> = None;
        for entry in &self.handlers {
            if !pattern_matches(&entry.0, path) {
                continue;
            }
            let better = match best {
                None => true,
                Some(current) => current.0 == "*" || current.0.len() < entry.0.len(),
            };
            if better {
                best = Some(entry);
            }
        }
        best.map(|entry| &*entry.1)
    }
}

/// Accepts or rejects a request expectation before the client transmits the
/// entity. Invoked for requests carrying `Expect: 100-continue` with the
/// preliminary interim response. Mutating its status to a final code, or failing,
/// rejects the expectation.
pub trait ExpectationVerifier: Send + Sync {
    fn verify(
        &self,
        request: &Request<()>,
        response: &mut Response<ResponseBody>,
        ctx: &Context,
    ) -> Result<(), ProtoError>;
}

/// Decides whether the connection may service another request after the given
/// response completes.
pub trait ConnReuseStrategy: Send + Sync {
    fn keep_alive(&self, response: &Response<BodySize>, ctx: &Context) -> bool;
}

/// Default http/1 reuse semantics: an explicit `Connection` header wins, close
/// delimited entities and protocol versions below 1.1 are not reusable.
pub struct DefaultConnReuse;

impl ConnReuseStrategy for DefaultConnReuse {
    fn keep_alive(&self, response: &Response<BodySize>, _: &Context) -> bool {
        if let Some(value) = response.headers().get(CONNECTION) {
            if value.as_bytes().eq_ignore_ascii_case(b"close") {
                return false;
            }
            if value.as_bytes().eq_ignore_ascii_case(b"keep-alive") {
                return true;
            }
        }

        if *response.body() == BodySize::Stream && response.version() < Version::HTTP_11 {
            return false;
        }

        response.version() >= Version::HTTP_11
    }
}

/// Connection lifecycle observer. All notifications default to no ops.
pub trait EventListener: Send + Sync {
    /// a connection became active.
    fn connection_open(&self) {}

    /// a connection was torn down. delivered once per connection.
    fn connection_closed(&self) {}

    /// an i/o failure terminated a connection.
    fn fatal_io_error(&self, _error: &io::Error) {}

    /// an http protocol failure escaped the synthetic response path and
    /// terminated a connection.
    fn fatal_protocol_error(&self, _error: &ProtoError) {}
}
