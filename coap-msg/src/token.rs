use core::fmt;

use crate::parse_error::MessageParseError;

/// A 0-8 byte application-level correlator between a request and its
/// response(s).
///
/// Unlike the message [`Id`](crate::Id), a token persists across a
/// Block2 walk or an Observe relationship: every notification for a
/// given observation carries the token the client registered with.
///
/// See [RFC7252 section 5.3.1](https://datatracker.ietf.org/doc/html/rfc7252#section-5.3.1).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(Vec<u8>);

impl Token {
  /// The empty token, used for messages that don't need correlation
  /// (e.g. an empty ACK).
  pub const EMPTY: Token = Token(Vec::new());

  /// Build a token from raw bytes, rejecting lengths over 8.
  pub fn new(bytes: Vec<u8>) -> Result<Self, MessageParseError> {
    if bytes.len() > 8 {
      Err(MessageParseError::TokenTooLong(bytes.len()))
    } else {
      Ok(Token(bytes))
    }
  }

  /// Derive an opaque token from arbitrary bytes using BLAKE2b,
  /// truncated to 8 bytes.
  pub fn opaque(data: &[u8]) -> Token {
    use blake2::digest::consts::U8;
    use blake2::{Blake2b, Digest};

    let mut digest = Blake2b::<U8>::new();
    digest.update(data);
    let out: [u8; 8] = digest.finalize().into();
    Token(out.to_vec())
  }

  /// Borrow the token's bytes.
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  /// Number of bytes in the token (0-8).
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// True when the token is empty.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl TryFrom<&[u8]> for Token {
  type Error = MessageParseError;

  fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
    Token::new(bytes.to_vec())
  }
}

impl fmt::Debug for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Token(")?;
    for b in &self.0 {
      write!(f, "{b:02x}")?;
    }
    write!(f, ")")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_long_tokens() {
    assert!(Token::new(vec![0u8; 9]).is_err());
    assert!(Token::new(vec![0u8; 8]).is_ok());
    assert!(Token::new(vec![]).is_ok());
  }

  #[test]
  fn opaque_is_deterministic_and_short() {
    let a = Token::opaque(b"hello");
    let b = Token::opaque(b"hello");
    let c = Token::opaque(b"world");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 8);
  }
}
