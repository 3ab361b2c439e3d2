//! error types.

use core::fmt;

use std::{error, io};

use crate::http::{StatusCode, Version};

/// Http failure with a defined status code mapping. Raised by request handlers,
/// interceptors and the reactor codec layer. Recoverable: the service handler
/// turns it into a synthetic error response instead of tearing the connection down.
pub enum ProtoError {
    /// request method is not implemented by this server. maps to 501.
    MethodNotSupported(String),
    /// request http version can not be serviced. maps to 505.
    VersionNotSupported(Version),
    /// message violates the http protocol. maps to 400.
    Protocol(String),
    /// handler failure outside the protocol taxonomy. maps to 500.
    Handler(String),
}

impl ProtoError {
    /// status code the error is observed as on the wire.
    pub fn status(&self) -> StatusCode {
        match *self {
            Self::MethodNotSupported(_) => StatusCode::NOT_IMPLEMENTED,
            Self::VersionNotSupported(_) => StatusCode::HTTP_VERSION_NOT_SUPPORTED,
            Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Debug for ProtoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MethodNotSupported(ref msg) => write!(f, "MethodNotSupported({msg})"),
            Self::VersionNotSupported(ref ver) => write!(f, "VersionNotSupported({ver:?})"),
            Self::Protocol(ref msg) => write!(f, "Protocol({msg})"),
            Self::Handler(ref msg) => write!(f, "Handler({msg})"),
        }
    }
}

impl fmt::Display for ProtoError {
    // the rendering doubles as the body of a synthetic error response.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MethodNotSupported(ref msg) | Self::Protocol(ref msg) | Self::Handler(ref msg) => f.write_str(msg),
            Self::VersionNotSupported(ref ver) => write!(f, "{ver:?} protocol version not supported"),
        }
    }
}

impl error::Error for ProtoError {}

/// Connection level error surface of the service handler and worker routine.
pub enum Error {
    /// socket, codec or buffer failure. fatal for the connection.
    Io(io::Error),
    /// http protocol failure that escaped the synthetic response path.
    Proto(ProtoError),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Io(ref e) => fmt::Debug::fmt(e, f),
            Self::Proto(ref e) => fmt::Debug::fmt(e, f),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Io(ref e) => fmt::Display::fmt(e, f),
            Self::Proto(ref e) => fmt::Display::fmt(e, f),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ProtoError> for Error {
    fn from(e: ProtoError) -> Self {
        Self::Proto(e)
    }
}

// Shutdown induced wake of a blocked buffer or state wait. ErrorKind::Interrupted
// is not usable here: io::copy and Write::write_all transparently retry on it and
// a worker would spin against a buffer that can never make progress again.
pub(crate) fn interrupted() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "interrupted by connection shutdown")
}

pub(crate) fn is_interrupted(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::ConnectionAborted
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ProtoError::MethodNotSupported(String::new()).status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(ProtoError::VersionNotSupported(Version::HTTP_2).status(), StatusCode::HTTP_VERSION_NOT_SUPPORTED);
        assert_eq!(ProtoError::Protocol(String::new()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProtoError::Handler(String::new()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn display_is_message() {
        let e = ProtoError::Protocol("bad".into());
        assert_eq!(e.to_string(), "bad");

        let e = ProtoError::MethodNotSupported("TRACE method not supported".into());
        assert_eq!(e.to_string(), "TRACE method not supported");
    }

    #[test]
    fn interrupted_round_trip() {
        assert!(is_interrupted(&interrupted()));
        assert!(!is_interrupted(&io::Error::other("boom")));
    }
}
