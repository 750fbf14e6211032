//! Transport-agnostic CoAP messaging engine: retransmission, resource
//! dispatch, Observe ([RFC7641](https://datatracker.ietf.org/doc/html/rfc7641)),
//! and blockwise transfer ([RFC7959](https://datatracker.ietf.org/doc/html/rfc7959))
//! built on top of [`coap_msg`]'s wire representation.
//!
//! `coap-core` owns no socket. The host owns the clock and the actual
//! I/O: it samples its own monotonic time, hands inbound datagrams to
//! [`Engine::on_datagram`](engine::Engine::on_datagram), periodically calls
//! [`Engine::advance`](engine::Engine::advance) to service retransmissions and
//! Observe notifications, and implements [`Transport`] to let the engine
//! send bytes back out.
//!
//! ```
//! use coap_core::config::Config;
//! use coap_core::endpoint::{Endpoint, IpAddr};
//! use coap_core::engine::Engine;
//! use coap_core::resource::{HandlerOutcome, MethodSet, Resource};
//! use coap_core::transport::Transport;
//! use coap_msg::{Code, Message};
//!
//! struct Loopback;
//! impl Transport for Loopback {
//!   type Error = core::convert::Infallible;
//!   fn send(&mut self, _endpoint: Endpoint, _bytes: &[u8]) -> Result<(), Self::Error> {
//!     Ok(())
//!   }
//! }
//!
//! let mut engine = Engine::new(Config::default());
//! engine.registry_mut().activate(Resource::new("hello", MethodSet::GET, |_: &Message, resp: &mut Message| {
//!   resp.code = Code::CONTENT;
//!   resp.set_payload(b"world".to_vec());
//!   HandlerOutcome::Responded
//! }));
//! ```

#![deny(missing_debug_implementations)]
#![warn(missing_docs)]

/// host-owned monotonic time
pub mod time;

/// jittered exponential-backoff retry timing
pub mod retry;

/// runtime configuration
pub mod config;

/// the engine's error type
pub mod error;

/// transport-agnostic peer identity
pub mod endpoint;

/// the outbound send seam
pub mod transport;

pub(crate) mod logging;

/// the bounded, retrying transaction table
pub mod transaction;

/// resource registry and request dispatch
pub mod resource;

/// middleware run before resource dispatch
pub mod handler_chain;

/// Block1/Block2 blockwise transfer
pub mod block;

/// the Observe extension (RFC7641)
pub mod observe;

/// the client-side Block2 walker
pub mod client;

/// separate-response continuations (RFC7252 §5.2.2)
pub mod separate;

/// the top-level engine gluing the above together
pub mod engine;

pub use client::{ClientRequest, ClientStatus};
pub use config::Config;
pub use endpoint::{Endpoint, IpAddr};
pub use engine::{Engine, EngineEvent};
pub use error::{Error, What, When};
pub use resource::{Handler, HandlerOutcome, MethodSet, PeriodicHandler, Resource, ResourceFlags};
pub use separate::SeparateResponse;
pub use transport::Transport;
