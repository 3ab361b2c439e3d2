//! re-export of [http] crate types and http/1 framing helpers.

pub use ::http::*;

use self::header::{CONTENT_LENGTH, EXPECT, TRANSFER_ENCODING};

/// Some often used header value.
#[allow(clippy::declare_interior_mutable_const)]
pub mod const_header_value {
    use ::http::header::HeaderValue;

    macro_rules! const_value {
            ($(($ident: ident, $expr: expr)), *) => {
                $(
                   pub const $ident: HeaderValue = HeaderValue::from_static($expr);
                )*
            }
        }

    const_value!(
        (CLOSE, "close"),
        (KEEP_ALIVE, "keep-alive"),
        (CHUNKED, "chunked"),
        (TEXT_ASCII, "text/plain; charset=US-ASCII")
    );
}

/// Request line of the message being serviced: method, uri and the version the
/// client announced (before any downgrade).
///
/// Stashed in the connection context under
/// [HTTP_REQUEST](crate::context::HTTP_REQUEST) so response interceptors, which
/// only see the outgoing message, can still consult the request head.
#[derive(Clone, Debug)]
pub struct RequestLine {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
}

impl RequestLine {
    pub fn new<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
        }
    }
}

/// true when the request announces an entity: a transfer coding is declared or a
/// non zero content length is present. A `content-length: 0` request is treated as
/// entity absent. its decoder never delivers bytes so no body stream must be
/// created for it.
pub fn is_entity_enclosing<B>(req: &Request<B>) -> bool {
    if req.headers().contains_key(TRANSFER_ENCODING) {
        return true;
    }
    req.headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

/// true when the request asks for a `100 Continue` interim response before
/// transmitting its entity.
pub fn expect_continue<B>(req: &Request<B>) -> bool {
    req.headers()
        .get(EXPECT)
        .is_some_and(|value| value.as_bytes().eq_ignore_ascii_case(b"100-continue"))
}

/// Whether a response to the given request method may carry an entity.
/// HEAD responses and 1xx, 204 and 304 status codes never do.
pub fn can_have_body(method: &Method, status: StatusCode) -> bool {
    *method != Method::HEAD
        && status.as_u16() >= 200
        && status != StatusCode::NO_CONTENT
        && status != StatusCode::NOT_MODIFIED
}

/// Cap the protocol version at http/1.1. Requests announcing a greater version are
/// serviced as 1.1.
pub fn downgrade(version: Version) -> Version {
    if version > Version::HTTP_11 { Version::HTTP_11 } else { version }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entity_enclosing() {
        let req = Request::builder().header("content-length", "5").body(()).unwrap();
        assert!(is_entity_enclosing(&req));

        let req = Request::builder().header("content-length", "0").body(()).unwrap();
        assert!(!is_entity_enclosing(&req));

        let req = Request::builder().header("transfer-encoding", "chunked").body(()).unwrap();
        assert!(is_entity_enclosing(&req));

        let req = Request::builder().body(()).unwrap();
        assert!(!is_entity_enclosing(&req));
    }

    #[test]
    fn continue_expectation() {
        let req = Request::builder().header("expect", "100-Continue").body(()).unwrap();
        assert!(expect_continue(&req));

        let req = Request::builder().body(()).unwrap();
        assert!(!expect_continue(&req));
    }

    #[test]
    fn body_allowance() {
        assert!(can_have_body(&Method::GET, StatusCode::OK));
        assert!(!can_have_body(&Method::HEAD, StatusCode::OK));
        assert!(!can_have_body(&Method::GET, StatusCode::CONTINUE));
        assert!(!can_have_body(&Method::GET, StatusCode::NO_CONTENT));
        assert!(!can_have_body(&Method::GET, StatusCode::NOT_MODIFIED));
        assert!(can_have_body(&Method::POST, StatusCode::BAD_REQUEST));
    }

    #[test]
    fn version_downgrade() {
        assert_eq!(downgrade(Version::HTTP_2), Version::HTTP_11);
        assert_eq!(downgrade(Version::HTTP_3), Version::HTTP_11);
        assert_eq!(downgrade(Version::HTTP_11), Version::HTTP_11);
        assert_eq!(downgrade(Version::HTTP_10), Version::HTTP_10);
    }
}
