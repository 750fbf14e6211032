//! Low-level representation of CoAP messages ([RFC 7252](https://datatracker.ietf.org/doc/html/rfc7252)).
//!
//! `coap-msg` knows nothing about sockets, retries, or resources; it is
//! strictly concerned with turning a [`Message`] into bytes and back.
//!
//! ```
//! use coap_msg::{Code, Id, Message, MessageOptions, Payload, Token, Type};
//!
//! let mut req = Message::new(Type::Con, Code::GET, Id(1), Token::new(vec![0xAB]).unwrap());
//! req.set_path("hello").unwrap();
//!
//! let bytes = req.to_bytes().unwrap();
//! let parsed = Message::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.path().unwrap(), "hello");
//! ```

#![deny(missing_debug_implementations)]
#![warn(missing_docs)]

mod code;
mod id;
mod message;
mod opt;
mod parse_error;
mod to_bytes;
mod token;
mod ty;

pub use code::{Code, CodeKind};
pub use id::Id;
pub use message::{Message, Payload};
pub use opt::known::{Block, ContentFormat, ObserveAction};
pub use opt::{MessageOptions, Opt, OptNumber, OptValue};
pub use parse_error::MessageParseError;
pub use to_bytes::{peek_header, MessageToBytesError};
pub use token::Token;
pub use ty::Type;
