use crate::parse_error::MessageParseError;

/// Indicates if this message is Confirmable, Non-confirmable,
/// an Acknowledgement, or a Reset.
///
/// See [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// A message that elicits exactly one ACK or RST in reply.
  Con,
  /// A message that does not require acknowledgement.
  Non,
  /// Acknowledges that a specific Confirmable message arrived; may
  /// also carry a piggybacked response.
  Ack,
  /// Indicates that a message was received but could not be processed.
  Reset,
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::InvalidType(b)),
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> Self {
    match t {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}
