//! Option numbers, the option-set bitmap, and typed accessors.
//!
//! A low-level `(number, value)` pair is used for wire encode/decode,
//! with a typed [`MessageOptions`] trait layered on top for the options
//! this core recognizes.

use std::collections::BTreeMap;

use crate::parse_error::MessageParseError;

pub mod known;

/// A CoAP option number. See the option numbers listed in
/// [RFC7252 section 12.2](https://datatracker.ietf.org/doc/html/rfc7252#section-12.2).
pub type OptNumber = u16;

/// The raw bytes carried by one occurrence of an option.
pub type OptValue = Vec<u8>;

/// One option as it appears on the wire: an absolute number (after
/// resolving the delta chain) plus its raw value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opt {
  /// The absolute option number.
  pub number: OptNumber,
  /// The option's raw value.
  pub value: OptValue,
}

/// Option numbers this core assigns meaning to.
pub mod number {
  use super::OptNumber;

  /// If-Match
  pub const IF_MATCH: OptNumber = 1;
  /// Uri-Host
  pub const URI_HOST: OptNumber = 3;
  /// ETag
  pub const ETAG: OptNumber = 4;
  /// If-None-Match
  pub const IF_NONE_MATCH: OptNumber = 5;
  /// Observe
  pub const OBSERVE: OptNumber = 6;
  /// Uri-Port
  pub const URI_PORT: OptNumber = 7;
  /// Location-Path
  pub const LOCATION_PATH: OptNumber = 8;
  /// Uri-Path
  pub const URI_PATH: OptNumber = 11;
  /// Content-Format
  pub const CONTENT_FORMAT: OptNumber = 12;
  /// Max-Age
  pub const MAX_AGE: OptNumber = 14;
  /// Uri-Query
  pub const URI_QUERY: OptNumber = 15;
  /// Accept
  pub const ACCEPT: OptNumber = 17;
  /// Location-Query
  pub const LOCATION_QUERY: OptNumber = 20;
  /// Block2
  pub const BLOCK2: OptNumber = 23;
  /// Block1
  pub const BLOCK1: OptNumber = 27;
  /// Size2
  pub const SIZE2: OptNumber = 28;
  /// Proxy-Uri
  pub const PROXY_URI: OptNumber = 35;
  /// Proxy-Scheme
  pub const PROXY_SCHEME: OptNumber = 39;
  /// Size1
  pub const SIZE1: OptNumber = 60;

  const KNOWN: &[OptNumber] = &[IF_MATCH,
                                URI_HOST,
                                ETAG,
                                IF_NONE_MATCH,
                                OBSERVE,
                                URI_PORT,
                                LOCATION_PATH,
                                URI_PATH,
                                CONTENT_FORMAT,
                                MAX_AGE,
                                URI_QUERY,
                                ACCEPT,
                                LOCATION_QUERY,
                                BLOCK2,
                                BLOCK1,
                                SIZE2,
                                PROXY_URI,
                                PROXY_SCHEME,
                                SIZE1];

  /// Is this one of the option numbers this core understands?
  pub fn is_known(n: OptNumber) -> bool {
    KNOWN.contains(&n)
  }

  /// Odd option numbers are "critical": an endpoint that does not
  /// recognize them must reject the message.
  pub fn is_critical(n: OptNumber) -> bool {
    n % 2 == 1
  }

  /// Can this option appear more than once in a message?
  pub fn is_repeatable(n: OptNumber) -> bool {
    matches!(n,
             IF_MATCH | ETAG | LOCATION_PATH | URI_PATH | LOCATION_QUERY | URI_QUERY)
  }
}

/// The map of options carried by a [`Message`](crate::Message):
/// option number to one-or-more raw values, kept in ascending key
/// order so wire encoding can walk it directly.
pub type OptionMap = BTreeMap<OptNumber, Vec<OptValue>>;

fn read_ext(head: u8, bytes: &[u8], ix: &mut usize) -> Result<u32, MessageParseError> {
  match head {
    | 13 => {
      let n = *bytes.get(*ix).ok_or(MessageParseError::UnexpectedEndOfStream)?;
      *ix += 1;
      Ok(n as u32 + 13)
    },
    | 14 => {
      let a = *bytes.get(*ix).ok_or(MessageParseError::UnexpectedEndOfStream)?;
      let b = *bytes.get(*ix + 1).ok_or(MessageParseError::UnexpectedEndOfStream)?;
      *ix += 2;
      Ok(u16::from_be_bytes([a, b]) as u32 + 269)
    },
    | 15 => Err(MessageParseError::OptionFormatError),
    | n => Ok(n as u32),
  }
}

/// Parse the option sequence starting at `bytes[0]`, stopping at the
/// `0xFF` payload marker or end of input.
///
/// Returns the parsed options (in encounter order, already resolved
/// to absolute numbers) and the number of bytes consumed, *not*
/// including the payload marker.
pub(crate) fn parse_options(bytes: &[u8]) -> Result<(Vec<Opt>, usize), MessageParseError> {
  let mut opts = Vec::new();
  let mut ix = 0usize;
  let mut last_num: u32 = 0;

  loop {
    match bytes.get(ix) {
      | None => break,
      | Some(&0xFF) => break,
      | Some(&head) => {
        let delta_nib = (head >> 4) & 0b1111;
        let len_nib = head & 0b1111;
        ix += 1;

        let delta = read_ext(delta_nib, bytes, &mut ix)?;
        let len = read_ext(len_nib, bytes, &mut ix)? as usize;

        let number = last_num + delta;
        last_num = number;

        if !number::is_known(number as u16) && number::is_critical(number as u16) {
          return Err(MessageParseError::UnknownCriticalOption(number));
        }

        let end = ix + len;
        if end > bytes.len() {
          return Err(MessageParseError::UnexpectedEndOfStream);
        }
        let value = bytes[ix..end].to_vec();
        ix = end;

        opts.push(Opt { number: number as u16, value });
      },
    }
  }

  Ok((opts, ix))
}

fn write_ext(n: u32, out: &mut Vec<u8>) -> u8 {
  if n < 13 {
    n as u8
  } else if n < 269 {
    out.push((n - 13) as u8);
    13
  } else {
    let n = (n - 269) as u16;
    out.extend_from_slice(&n.to_be_bytes());
    14
  }
}

/// Serialize `opts` (which must already be in ascending-number,
/// repeat-preserving order) using delta encoding between entries.
pub(crate) fn encode_options(opts: &OptionMap, out: &mut Vec<u8>) {
  let mut last_num: u32 = 0;

  for (&number, values) in opts.iter() {
    for value in values.iter() {
      let delta = number as u32 - last_num;
      last_num = number as u32;

      let mut ext = Vec::new();
      let delta_nib = write_ext(delta, &mut ext);
      let len_nib = write_ext(value.len() as u32, &mut ext);

      out.push((delta_nib << 4) | len_nib);
      out.extend_from_slice(&ext);
      out.extend_from_slice(value);
    }
  }
}

/// Typed accessors for the options this core recognizes, layered on
/// top of the raw `number -> values` map carried by a [`Message`].
///
/// Multi-segment options (Uri-Path, Uri-Query, Location-Path,
/// Location-Query) are exposed pre-joined with `/` or `&`
/// respectively; setting them splits on the same separator.
pub trait MessageOptions {
  /// Borrow the raw option map.
  fn opts(&self) -> &OptionMap;
  /// Mutably borrow the raw option map.
  fn opts_mut(&mut self) -> &mut OptionMap;

  /// Get a single-value option's raw bytes, if present.
  fn opt(&self, n: OptNumber) -> Option<&[u8]> {
    self.opts().get(&n).and_then(|v| v.first()).map(|v| v.as_slice())
  }

  /// Set a single-value option, replacing any prior value(s).
  fn set_opt(&mut self, n: OptNumber, value: Vec<u8>) {
    self.opts_mut().insert(n, vec![value]);
  }

  /// Remove an option entirely.
  fn remove_opt(&mut self, n: OptNumber) {
    self.opts_mut().remove(&n);
  }

  /// Content-Format (option 12), if present.
  fn content_format(&self) -> Option<known::ContentFormat> {
    self.opt(number::CONTENT_FORMAT).and_then(|b| parse_uint(b)).map(|n| (n as u16).into())
  }

  /// Set Content-Format (option 12).
  fn set_content_format(&mut self, cf: known::ContentFormat) {
    self.set_opt(number::CONTENT_FORMAT, cf.bytes().to_vec());
  }

  /// Max-Age in seconds (option 14), if present.
  fn max_age(&self) -> Option<u32> {
    self.opt(number::MAX_AGE).and_then(parse_uint)
  }

  /// Set Max-Age in seconds (option 14).
  fn set_max_age(&mut self, seconds: u32) {
    self.set_opt(number::MAX_AGE, encode_uint(seconds));
  }

  /// All ETag values (option 4), in occurrence order.
  fn etags(&self) -> Vec<&[u8]> {
    self.opts()
        .get(&number::ETAG)
        .map(|v| v.iter().map(|b| b.as_slice()).collect())
        .unwrap_or_default()
  }

  /// Append an ETag value (option 4).
  fn add_etag(&mut self, etag: Vec<u8>) {
    self.opts_mut().entry(number::ETAG).or_default().push(etag);
  }

  /// All If-Match values (option 1), in occurrence order. An empty
  /// vec with the option present (but no entries) represents the
  /// "any current representation" match-on-existence form.
  fn if_match(&self) -> Vec<&[u8]> {
    self.opts()
        .get(&number::IF_MATCH)
        .map(|v| v.iter().map(|b| b.as_slice()).collect())
        .unwrap_or_default()
  }

  /// Append an If-Match value (option 1).
  fn add_if_match(&mut self, etag: Vec<u8>) {
    self.opts_mut().entry(number::IF_MATCH).or_default().push(etag);
  }

  /// Uri-Port (option 7), if present.
  fn uri_port(&self) -> Option<u16> {
    self.opt(number::URI_PORT).and_then(parse_uint).map(|n| n as u16)
  }

  /// Set Uri-Port (option 7).
  fn set_uri_port(&mut self, port: u16) {
    self.set_opt(number::URI_PORT, encode_uint(port as u32));
  }

  /// Uri-Host (option 3) as UTF-8, if present and valid.
  fn uri_host(&self) -> Option<&str> {
    self.opt(number::URI_HOST).and_then(|b| std::str::from_utf8(b).ok())
  }

  /// Set Uri-Host (option 3).
  fn set_uri_host(&mut self, host: &str) {
    self.set_opt(number::URI_HOST, host.as_bytes().to_vec());
  }

  /// Uri-Path (option 11) segments concatenated with `/`.
  fn path(&self) -> Result<String, std::str::Utf8Error> {
    join_segments(self.opts().get(&number::URI_PATH), '/')
  }

  /// Split `path` on `/` and set each segment as a Uri-Path (option 11) occurrence.
  fn set_path(&mut self, path: &str) -> Result<(), MessageParseError> {
    set_segments(self.opts_mut(), number::URI_PATH, path, '/')
  }

  /// Uri-Query (option 15) segments concatenated with `&`.
  fn query(&self) -> Result<String, std::str::Utf8Error> {
    join_segments(self.opts().get(&number::URI_QUERY), '&')
  }

  /// Split `query` on `&` and set each segment as a Uri-Query (option 15) occurrence.
  fn set_query(&mut self, query: &str) -> Result<(), MessageParseError> {
    set_segments(self.opts_mut(), number::URI_QUERY, query, '&')
  }

  /// Location-Path (option 8) segments concatenated with `/`.
  fn location_path(&self) -> Result<String, std::str::Utf8Error> {
    join_segments(self.opts().get(&number::LOCATION_PATH), '/')
  }

  /// Split `path` on `/` and set each segment as a Location-Path (option 8) occurrence.
  fn set_location_path(&mut self, path: &str) -> Result<(), MessageParseError> {
    set_segments(self.opts_mut(), number::LOCATION_PATH, path, '/')
  }

  /// Location-Query (option 20) segments concatenated with `&`.
  fn location_query(&self) -> Result<String, std::str::Utf8Error> {
    join_segments(self.opts().get(&number::LOCATION_QUERY), '&')
  }

  /// Split `query` on `&` and set each segment as a Location-Query (option 20) occurrence.
  fn set_location_query(&mut self, query: &str) -> Result<(), MessageParseError> {
    set_segments(self.opts_mut(), number::LOCATION_QUERY, query, '&')
  }

  /// Observe (option 6), a 24-bit sequence number or registration/deregistration flag.
  fn observe(&self) -> Option<u32> {
    self.opt(number::OBSERVE).and_then(parse_uint).map(|n| n & 0x00FF_FFFF)
  }

  /// Set Observe (option 6) to a value in `0..2^24`.
  fn set_observe(&mut self, seq: u32) {
    self.set_opt(number::OBSERVE, encode_uint(seq & 0x00FF_FFFF));
  }

  /// Accept (option 17), if present.
  fn accept(&self) -> Option<known::ContentFormat> {
    self.opt(number::ACCEPT).and_then(parse_uint).map(|n| (n as u16).into())
  }

  /// Set Accept (option 17).
  fn set_accept(&mut self, cf: known::ContentFormat) {
    self.set_opt(number::ACCEPT, cf.bytes().to_vec());
  }

  /// If-None-Match (option 5): present with an empty value when set.
  fn if_none_match(&self) -> bool {
    self.opts().contains_key(&number::IF_NONE_MATCH)
  }

  /// Set the empty-valued If-None-Match (option 5) flag.
  fn set_if_none_match(&mut self) {
    self.set_opt(number::IF_NONE_MATCH, Vec::new());
  }

  /// Block1 (option 27): describes the request-body chunk being sent/received.
  ///
  /// A reserved SZX (see [`known::Block::from_wire`]) is unreachable
  /// through a parsed [`Message`](crate::Message): [`crate::to_bytes::parse`]
  /// rejects it up front with [`MessageParseError::InvalidBlockOption`].
  /// A message built in-memory with a bad raw value still decodes to
  /// `None` here rather than panicking.
  fn block1(&self) -> Option<known::Block> {
    self.opt(number::BLOCK1).and_then(|b| parse_uint(b)).and_then(known::Block::from_wire)
  }

  /// Set Block1 (option 27).
  fn set_block1(&mut self, b: known::Block) {
    self.set_opt(number::BLOCK1, encode_uint(b.to_wire()));
  }

  /// Block2 (option 23): describes the response-body chunk being sent/received.
  ///
  /// See the note on [`MessageOptions::block1`]: a reserved SZX never
  /// reaches here through a parsed message.
  fn block2(&self) -> Option<known::Block> {
    self.opt(number::BLOCK2).and_then(|b| parse_uint(b)).and_then(known::Block::from_wire)
  }

  /// Set Block2 (option 23).
  fn set_block2(&mut self, b: known::Block) {
    self.set_opt(number::BLOCK2, encode_uint(b.to_wire()));
  }

  /// Size1 (option 60): total size of a request body being transferred with Block1.
  fn size1(&self) -> Option<u32> {
    self.opt(number::SIZE1).and_then(parse_uint)
  }

  /// Set Size1 (option 60).
  fn set_size1(&mut self, size: u32) {
    self.set_opt(number::SIZE1, encode_uint(size));
  }

  /// Size2 (option 28): total size of a response body being transferred with Block2.
  fn size2(&self) -> Option<u32> {
    self.opt(number::SIZE2).and_then(parse_uint)
  }

  /// Set Size2 (option 28).
  fn set_size2(&mut self, size: u32) {
    self.set_opt(number::SIZE2, encode_uint(size));
  }

  /// Proxy-Uri (option 35), if present and valid UTF-8.
  fn proxy_uri(&self) -> Option<&str> {
    self.opt(number::PROXY_URI).and_then(|b| std::str::from_utf8(b).ok())
  }

  /// Set Proxy-Uri (option 35).
  fn set_proxy_uri(&mut self, uri: &str) {
    self.set_opt(number::PROXY_URI, uri.as_bytes().to_vec());
  }

  /// Proxy-Scheme (option 39), if present and valid UTF-8.
  fn proxy_scheme(&self) -> Option<&str> {
    self.opt(number::PROXY_SCHEME).and_then(|b| std::str::from_utf8(b).ok())
  }

  /// Set Proxy-Scheme (option 39).
  fn set_proxy_scheme(&mut self, scheme: &str) {
    self.set_opt(number::PROXY_SCHEME, scheme.as_bytes().to_vec());
  }
}

fn parse_uint(bytes: &[u8]) -> Option<u32> {
  if bytes.len() > 4 {
    return None;
  }
  let mut buf = [0u8; 4];
  buf[4 - bytes.len()..].copy_from_slice(bytes);
  Some(u32::from_be_bytes(buf))
}

fn encode_uint(n: u32) -> Vec<u8> {
  let bytes = n.to_be_bytes();
  let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(3);
  bytes[first_nonzero..].to_vec()
}

fn join_segments(values: Option<&Vec<OptValue>>, sep: char) -> Result<String, std::str::Utf8Error> {
  match values {
    | None => Ok(String::new()),
    | Some(values) => {
      let mut segs = Vec::with_capacity(values.len());
      for v in values {
        segs.push(std::str::from_utf8(v)?);
      }
      Ok(segs.join(&sep.to_string()))
    },
  }
}

fn set_segments(opts: &mut OptionMap,
                 number: OptNumber,
                 joined: &str,
                 sep: char)
                 -> Result<(), MessageParseError> {
  if joined.is_empty() {
    opts.remove(&number);
    return Ok(());
  }

  let values: Vec<OptValue> = joined.split(sep).map(|s| s.as_bytes().to_vec()).collect();
  opts.insert(number, values);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn option_roundtrip_simple() {
    let mut map: OptionMap = BTreeMap::new();
    map.insert(number::URI_PATH, vec![b"a".to_vec(), b"b".to_vec()]);
    map.insert(number::CONTENT_FORMAT, vec![vec![0]]);

    let mut bytes = Vec::new();
    encode_options(&map, &mut bytes);

    let (opts, consumed) = parse_options(&bytes).unwrap();
    assert_eq!(consumed, bytes.len());
    assert_eq!(opts.len(), 3);
    assert_eq!(opts[0].number, number::URI_PATH);
    assert_eq!(opts[0].value, b"a");
    assert_eq!(opts[1].number, number::URI_PATH);
    assert_eq!(opts[1].value, b"b");
    assert_eq!(opts[2].number, number::CONTENT_FORMAT);
  }

  #[test]
  fn option_extension_bytes_round_trip() {
    // option number 300 requires the 14-extension, value length 300 requires it too.
    let mut map: OptionMap = BTreeMap::new();
    map.insert(300, vec![vec![7u8; 300]]);

    let mut bytes = Vec::new();
    encode_options(&map, &mut bytes);
    let (opts, _) = parse_options(&bytes).unwrap();
    assert_eq!(opts[0].number, 300);
    assert_eq!(opts[0].value.len(), 300);
  }

  #[test]
  fn unknown_critical_option_rejected() {
    let mut map: OptionMap = BTreeMap::new();
    map.insert(19, vec![vec![1]]); // odd, not in our known list
    let mut bytes = Vec::new();
    encode_options(&map, &mut bytes);

    assert_eq!(parse_options(&bytes), Err(MessageParseError::UnknownCriticalOption(19)));
  }

  #[test]
  fn unknown_elective_option_skipped() {
    let mut map: OptionMap = BTreeMap::new();
    map.insert(2, vec![vec![1]]); // even => elective, not in our known list, but still parsed as Opt
    let mut bytes = Vec::new();
    encode_options(&map, &mut bytes);

    let (opts, _) = parse_options(&bytes).unwrap();
    assert_eq!(opts[0].number, 2);
  }

  #[test]
  fn path_join_and_split() {
    let mut map: OptionMap = BTreeMap::new();
    set_segments(&mut map, number::URI_PATH, "a/b/c", '/').unwrap();
    assert_eq!(join_segments(map.get(&number::URI_PATH), '/').unwrap(), "a/b/c");
  }

  #[test]
  fn if_match_and_uri_port_roundtrip() {
    use crate::{Code, Id, Message, Token, Type};

    let mut msg = Message::new(Type::Con, Code::PUT, Id(1), Token::EMPTY);
    msg.add_if_match(vec![0xAA, 0xBB]);
    msg.add_if_match(vec![0xCC]);
    msg.set_uri_port(5683);

    assert_eq!(msg.if_match(), vec![&[0xAA, 0xBB][..], &[0xCC][..]]);
    assert_eq!(msg.uri_port(), Some(5683));
  }
}
