//! http message interceptor pipeline and the standard outbound interceptors.

use std::time::SystemTime;

use crate::{
    body::{BodySize, RequestBody, ResponseBody},
    context::{Context, HTTP_REQUEST},
    error::ProtoError,
    http::{
        Request, RequestLine, Response, StatusCode, Version,
        const_header_value::{CHUNKED, CLOSE},
        header::{CONNECTION, CONTENT_LENGTH, DATE, HeaderValue, SERVER, TRANSFER_ENCODING},
    },
};

/// Interceptor run over a received request before it reaches the handler.
pub trait RequestInterceptor: Send + Sync {
    fn process(&self, request: &mut Request<RequestBody>, ctx: &Context) -> Result<(), ProtoError>;
}

/// Interceptor run over an outgoing response before it is committed.
pub trait ResponseInterceptor: Send + Sync {
    fn process(&self, response: &mut Response<ResponseBody>, ctx: &Context) -> Result<(), ProtoError>;
}

/// Ordered interceptor chains applied to every message crossing the connection.
#[derive(Default)]
pub struct Pipeline {
    request: Vec<Box<dyn RequestInterceptor>>,
    response: Vec<Box<dyn ResponseInterceptor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard server side outbound chain: date, server token, content
    /// framing headers and connection control.
    pub fn server(token: HeaderValue) -> Self {
        Self::new()
            .response(ResponseDate)
            .response(ResponseServer::new(token))
            .response(ResponseContent)
            .response(ResponseConnControl)
    }

    pub fn request<I>(mut self, interceptor: I) -> Self
    where
        I: RequestInterceptor + 'static,
    {
        self.request.push(Box::new(interceptor));
        self
    }

    pub fn response<I>(mut self, interceptor: I) -> Self
    where
        I: ResponseInterceptor + 'static,
    {
        self.response.push(Box::new(interceptor));
        self
    }

    pub fn process_request(&self, request: &mut Request<RequestBody>, ctx: &Context) -> Result<(), ProtoError> {
        for interceptor in &self.request {
            interceptor.process(request, ctx)?;
        }
        Ok(())
    }

    pub fn process_response(&self, response: &mut Response<ResponseBody>, ctx: &Context) -> Result<(), ProtoError> {
        for interceptor in &self.response {
            interceptor.process(response, ctx)?;
        }
        Ok(())
    }
}

/// Adds the `Date` header to final responses that lack one.
pub struct ResponseDate;

impl ResponseInterceptor for ResponseDate {
    fn process(&self, response: &mut Response<ResponseBody>, _: &Context) -> Result<(), ProtoError> {
        if response.status().as_u16() >= 200 && !response.headers().contains_key(DATE) {
            let date = httpdate::fmt_http_date(SystemTime::now());
            let value = HeaderValue::try_from(date).map_err(|_| ProtoError::Protocol("invalid date header".into()))?;
            response.headers_mut().insert(DATE, value);
        }
        Ok(())
    }
}

/// Adds the configured `Server` token to responses that lack one.
pub struct ResponseServer {
    token: HeaderValue,
}

impl ResponseServer {
    pub fn new(token: HeaderValue) -> Self {
        Self { token }
    }
}

impl ResponseInterceptor for ResponseServer {
    fn process(&self, response: &mut Response<ResponseBody>, _: &Context) -> Result<(), ProtoError> {
        if !response.headers().contains_key(SERVER) {
            response.headers_mut().insert(SERVER, self.token.clone());
        }
        Ok(())
    }
}

/// Derives the content framing headers from the response entity. Pre set framing
/// headers are a protocol violation: the entity is the single source of truth.
pub struct ResponseContent;

impl ResponseInterceptor for ResponseContent {
    fn process(&self, response: &mut Response<ResponseBody>, _: &Context) -> Result<(), ProtoError> {
        if response.headers().contains_key(TRANSFER_ENCODING) {
            return Err(ProtoError::Protocol("transfer-encoding header already present".into()));
        }
        if response.headers().contains_key(CONTENT_LENGTH) {
            return Err(ProtoError::Protocol("content-length header already present".into()));
        }

        match response.body().size() {
            BodySize::Sized(len) => {
                response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
            }
            BodySize::Stream => {
                if response.version() >= Version::HTTP_11 {
                    response.headers_mut().insert(TRANSFER_ENCODING, CHUNKED);
                }
                // below 1.1 the entity is close delimited.
            }
            BodySize::None => {
                let status = response.status();
                if status != StatusCode::NO_CONTENT && status != StatusCode::NOT_MODIFIED {
                    response.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(0));
                }
            }
        }

        Ok(())
    }
}

/// Marks responses that must not outlive their connection with `Connection: close`.
pub struct ResponseConnControl;

impl ResponseInterceptor for ResponseConnControl {
    fn process(&self, response: &mut Response<ResponseBody>, ctx: &Context) -> Result<(), ProtoError> {
        let status = response.status().as_u16();
        if matches!(status, 400 | 408 | 411 | 413 | 414 | 501 | 503) {
            response.headers_mut().insert(CONNECTION, CLOSE);
            return Ok(());
        }
        if response.headers().contains_key(CONNECTION) {
            return Ok(());
        }

        // a close delimited entity can only be terminated by closing the socket.
        if response.body().size() == BodySize::Stream && response.version() < Version::HTTP_11 {
            response.headers_mut().insert(CONNECTION, CLOSE);
            return Ok(());
        }

        // clients announcing http/1.0 or below default to one exchange per
        // connection. make that explicit on the response.
        if ctx
            .get::<RequestLine>(HTTP_REQUEST)
            .is_some_and(|line| line.version <= Version::HTTP_10)
        {
            response.headers_mut().insert(CONNECTION, CLOSE);
        }

        Ok(())
    }
}
