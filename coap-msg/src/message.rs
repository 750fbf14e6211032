use crate::code::Code;
use crate::id::Id;
use crate::opt::{MessageOptions, OptionMap};
use crate::parse_error::MessageParseError;
use crate::to_bytes::MessageToBytesError;
use crate::token::Token;
use crate::ty::Type;

/// A message body. Plain bytes; interpretation is up to the
/// Content-Format option and the application.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
  /// Borrow the payload as a byte slice.
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

/// The CoAP protocol version this core implements. Always `1`.
///
/// See [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
pub const VERSION: u8 = 1;

/// A parsed or to-be-serialized CoAP message.
///
/// `Message` is the in-memory counterpart of the 4-byte header +
/// token + options + payload wire layout described in
/// [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
#[derive(Clone, Debug)]
pub struct Message {
  /// Always [`VERSION`]; kept as a field so a parsed message can
  /// report the version it actually claimed.
  pub ver: u8,
  /// Confirmable, Non-confirmable, Acknowledgement, or Reset.
  pub ty: Type,
  /// Method (for requests) or status (for responses).
  pub code: Code,
  /// 16-bit message id, used for deduplication and ACK/RST matching.
  pub id: Id,
  /// 0-8 byte correlator, stable across an Observe relationship or
  /// Block2 walk.
  pub token: Token,
  /// Recognized and unrecognized-but-elective options, keyed by
  /// option number.
  pub opts: OptionMap,
  /// The message body, if any.
  pub payload: Payload,
}

impl Message {
  /// Construct a message with no options and an empty payload.
  pub fn new(ty: Type, code: Code, id: Id, token: Token) -> Self {
    Message { ver: VERSION, ty, code, id, token, opts: OptionMap::new(), payload: Payload::default() }
  }

  /// An empty message (code `0.00`) of the given type and id, used
  /// for ACKs and RSTs.
  pub fn empty(ty: Type, id: Id) -> Self {
    Message::new(ty, Code::EMPTY, id, Token::EMPTY)
  }

  /// Set the payload.
  pub fn set_payload(&mut self, bytes: Vec<u8>) {
    self.payload = Payload(bytes);
  }

  /// Borrow the payload bytes.
  pub fn get_payload(&self) -> &[u8] {
    self.payload.as_bytes()
  }

  /// Serialize to CoAP wire format.
  pub fn to_bytes(&self) -> Result<Vec<u8>, MessageToBytesError> {
    crate::to_bytes::serialize(self)
  }

  /// Parse a datagram into a `Message`.
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessageParseError> {
    crate::to_bytes::parse(bytes)
  }
}

impl MessageOptions for Message {
  fn opts(&self) -> &OptionMap {
    &self.opts
  }

  fn opts_mut(&mut self) -> &mut OptionMap {
    &mut self.opts
  }
}

impl PartialEq for Message {
  fn eq(&self, other: &Self) -> bool {
    self.ver == other.ver
    && self.ty == other.ty
    && self.code == other.code
    && self.id == other.id
    && self.token == other.token
    && self.opts == other.opts
    && self.payload == other.payload
  }
}
