//! Wire-format serialization and parsing.
//!
//! Implements [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3):
//! a 4-byte header, 0-8 byte token, options encoded with delta/length
//! nibbles, and an optional `0xFF`-marked payload.

use core::fmt;

use crate::code::Code;
use crate::id::Id;
use crate::message::{Message, Payload, VERSION};
use crate::opt::{self, OptionMap};
use crate::parse_error::MessageParseError;
use crate::token::Token;
use crate::ty::Type;

/// Reasons serializing a [`Message`] to bytes can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageToBytesError {
  /// The token is longer than 8 bytes.
  TokenTooLong(usize),
}

impl fmt::Display for MessageToBytesError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Self::TokenTooLong(n) => write!(f, "token length {n} exceeds 8 bytes"),
    }
  }
}

impl std::error::Error for MessageToBytesError {}

/// Serialize `msg` to CoAP wire format.
///
/// Writes the 4-byte header, the token, options in ascending-number
/// order (each with symmetric delta/length nibble encoding to
/// [`parse`]), and the payload preceded by a `0xFF` marker iff it is
/// non-empty.
pub(crate) fn serialize(msg: &Message) -> Result<Vec<u8>, MessageToBytesError> {
  let tkl = msg.token.len();
  if tkl > 8 {
    return Err(MessageToBytesError::TokenTooLong(tkl));
  }

  let mut out = Vec::with_capacity(4 + tkl + msg.payload.as_bytes().len() + 16);

  let byte1 = (msg.ver << 6) | (u8::from(msg.ty) << 4) | tkl as u8;
  out.push(byte1);
  out.push(msg.code.into());
  out.extend_from_slice(&msg.id.to_be_bytes());
  out.extend_from_slice(msg.token.as_bytes());

  opt::encode_options(&msg.opts, &mut out);

  if !msg.payload.as_bytes().is_empty() {
    out.push(0xFF);
    out.extend_from_slice(msg.payload.as_bytes());
  }

  Ok(out)
}

/// Parse a datagram into a [`Message`].
///
/// Validates the version, rejects a token-length nibble in `9..=15`,
/// walks the option sequence (see [`opt::parse_options`]), and takes
/// everything after a `0xFF` marker as the payload. A marker with
/// nothing following it is a format error. A Block1/Block2 option
/// carrying the reserved SZX `7` is rejected here too, rather than
/// left for [`opt::MessageOptions::block1`]/`block2` to silently
/// treat as absent.
pub(crate) fn parse(bytes: &[u8]) -> Result<Message, MessageParseError> {
  if bytes.len() < 4 {
    return Err(MessageParseError::UnexpectedEndOfStream);
  }

  let byte1 = bytes[0];
  let ver = byte1 >> 6;
  if ver != VERSION {
    return Err(MessageParseError::UnsupportedVersion(ver));
  }
  let ty = Type::try_from((byte1 >> 4) & 0b11)?;
  let tkl = (byte1 & 0b1111) as usize;
  if tkl > 8 {
    return Err(MessageParseError::TokenTooLong(tkl));
  }

  let code = Code::from(bytes[1]);
  let id = Id::from_be_bytes([bytes[2], bytes[3]]);

  let mut ix = 4usize;
  if bytes.len() < ix + tkl {
    return Err(MessageParseError::UnexpectedEndOfStream);
  }
  let token = Token::new(bytes[ix..ix + tkl].to_vec())?;
  ix += tkl;

  let (raw_opts, consumed) = opt::parse_options(&bytes[ix..])?;
  ix += consumed;

  let mut opts: OptionMap = OptionMap::new();
  for o in raw_opts {
    if matches!(o.number, opt::number::BLOCK1 | opt::number::BLOCK2) && (o.value.last().copied().unwrap_or(0) & 0b111) == 7
    {
      return Err(MessageParseError::InvalidBlockOption(o.number as u32));
    }
    opts.entry(o.number).or_default().push(o.value);
  }

  let payload = match bytes.get(ix) {
    | None => Payload::default(),
    | Some(&0xFF) => {
      if ix + 1 >= bytes.len() {
        return Err(MessageParseError::PayloadMarkerWithNoPayload);
      }
      Payload(bytes[ix + 1..].to_vec())
    },
    | Some(_) => unreachable!("parse_options stops at 0xFF or end of input"),
  };

  Ok(Message { ver, ty, code, id, token, opts, payload })
}

/// Best-effort extraction of the type, id, and token from a datagram
/// that failed to [`parse`] fully — e.g. one carrying an unrecognized
/// critical option. The header and token are parsed before options
/// ever come into play, so this recovers enough to answer with a
/// matching RST or error response even though the full message
/// couldn't be built.
///
/// Returns `None` if the datagram is too short or malformed even at
/// the header/token level, in which case nothing can be sent back.
pub fn peek_header(bytes: &[u8]) -> Option<(Type, Id, Token)> {
  if bytes.len() < 4 {
    return None;
  }

  let byte1 = bytes[0];
  if byte1 >> 6 != VERSION {
    return None;
  }

  let ty = Type::try_from((byte1 >> 4) & 0b11).ok()?;
  let tkl = (byte1 & 0b1111) as usize;
  if tkl > 8 || bytes.len() < 4 + tkl {
    return None;
  }

  let id = Id::from_be_bytes([bytes[2], bytes[3]]);
  let token = Token::new(bytes[4..4 + tkl].to_vec()).ok()?;
  Some((ty, id, token))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::opt::MessageOptions;
  use crate::{ContentFormat, Token as TokenTy};

  #[test]
  fn roundtrip_minimal() {
    let msg = Message::new(Type::Con, Code::GET, Id(0x1234), TokenTy::new(vec![0xAB]).unwrap());
    let bytes = msg.to_bytes().unwrap();
    let parsed = Message::from_bytes(&bytes).unwrap();
    assert_eq!(msg, parsed);
  }

  #[test]
  fn roundtrip_with_options_and_payload() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(1), TokenTy::new(vec![1, 2, 3]).unwrap());
    msg.set_path("hello/world").unwrap();
    msg.set_content_format(ContentFormat::Json);
    msg.set_payload(b"{}".to_vec());

    let bytes = msg.to_bytes().unwrap();
    let parsed = Message::from_bytes(&bytes).unwrap();

    assert_eq!(parsed.path().unwrap(), "hello/world");
    assert_eq!(parsed.content_format(), Some(ContentFormat::Json));
    assert_eq!(parsed.get_payload(), b"{}");
  }

  #[test]
  fn token_length_0_and_8_roundtrip() {
    for len in [0, 8] {
      let msg = Message::new(Type::Non, Code::GET, Id(1), TokenTy::new(vec![7u8; len]).unwrap());
      let bytes = msg.to_bytes().unwrap();
      assert_eq!(Message::from_bytes(&bytes).unwrap().token.len(), len);
    }
  }

  #[test]
  fn token_length_9_rejected_on_parse() {
    // hand-craft a header claiming tkl=9 (reserved)
    let mut bytes = vec![(VERSION << 6) | 9, 1, 0, 0];
    bytes.extend_from_slice(&[0u8; 9]);
    assert_eq!(Message::from_bytes(&bytes), Err(MessageParseError::TokenTooLong(9)));
  }

  #[test]
  fn payload_marker_with_nothing_after_is_format_error() {
    let mut bytes = vec![VERSION << 6, 1, 0, 0];
    bytes.push(0xFF);
    assert_eq!(Message::from_bytes(&bytes), Err(MessageParseError::PayloadMarkerWithNoPayload));
  }

  #[test]
  fn peek_header_recovers_type_id_token_past_a_bad_option() {
    let mut msg = Message::new(Type::Con, Code::GET, Id(0x55), TokenTy::new(vec![9, 9]).unwrap());
    msg.opts.insert(19, vec![vec![1]]); // odd => critical, unrecognized
    let bytes = msg.to_bytes().unwrap();

    assert_eq!(Message::from_bytes(&bytes), Err(MessageParseError::UnknownCriticalOption(19)));
    assert_eq!(peek_header(&bytes), Some((Type::Con, Id(0x55), TokenTy::new(vec![9, 9]).unwrap())));
  }

  #[test]
  fn block1_with_reserved_szx_is_a_parse_error() {
    let mut msg = Message::new(Type::Con, Code::PUT, Id(1), TokenTy::new(vec![1]).unwrap());
    msg.opts.insert(crate::opt::number::BLOCK1, vec![vec![0b111]]); // num=0, more=false, szx=7
    let bytes = msg.to_bytes().unwrap();
    assert_eq!(Message::from_bytes(&bytes), Err(MessageParseError::InvalidBlockOption(27)));
  }

  #[test]
  fn peek_header_none_on_truncated_datagram() {
    assert_eq!(peek_header(&[0x40, 1]), None);
  }

  #[test]
  fn empty_ack() {
    let msg = Message::empty(Type::Ack, Id(42));
    let bytes = msg.to_bytes().unwrap();
    let parsed = Message::from_bytes(&bytes).unwrap();
    assert_eq!(parsed.code, Code::EMPTY);
    assert_eq!(parsed.ty, Type::Ack);
  }
}
