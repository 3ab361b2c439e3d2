//! Bridge between an event driven http/1 reactor and blocking request handlers.
//!
//! The reactor side of this crate is a set of non blocking event callbacks
//! ([EventHandler](handler::EventHandler)) driven by an external selector loop.
//! The handler side is ordinary sequential code reading a request entity from an
//! [io::Read](std::io::Read) stream and producing a response entity through an
//! [io::Write](std::io::Write) stream. The two worlds are coupled per connection by a
//! pair of bounded shared buffers which enforce backpressure on the network in both
//! directions, keeping the memory footprint of any connection bounded regardless of
//! request or response size.

#![forbid(unsafe_code)]

pub mod body;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod conn;
pub mod context;
pub mod error;
pub mod executor;
pub mod handler;
pub mod http;
pub mod pipeline;
pub mod service;

pub use self::body::{BodySize, RequestBody, ResponseBody};
pub use self::config::ServiceConfig;
pub use self::conn::{ConnState, InputState, IoControl, OutputState, ServerConnection};
pub use self::error::{Error, ProtoError};
pub use self::handler::{EventHandler, ServiceHandler, ServiceHandlerBuilder};
