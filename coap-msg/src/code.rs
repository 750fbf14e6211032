use core::fmt;

/// A CoAP message code: for requests, the method; for responses,
/// the status class and detail ("2.05", "4.04", ...).
///
/// See [RFC7252 section 12.1](https://datatracker.ietf.org/doc/html/rfc7252#section-12.1).
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Code {
  /// `0` = request, `2` = success, `4` = client error, `5` = server error.
  pub class: u8,
  /// Two-digit detail, `[0, 32)`. Always `0` for requests.
  pub detail: u8,
}

/// Whether a [`Code`] identifies a request, a response, or the empty message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
  /// A request code (`0.01`-`0.04`).
  Request,
  /// A response code (`2.xx`-`5.xx`).
  Response,
  /// The empty message code (`0.00`).
  Empty,
}

impl Code {
  /// Construct a code from its class and detail digits.
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Classify this code as a request, response, or empty message.
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// The empty message code, `0.00`.
  pub const EMPTY: Self = Self::new(0, 0);
  /// `GET`, `0.01`.
  pub const GET: Self = Self::new(0, 1);
  /// `POST`, `0.02`.
  pub const POST: Self = Self::new(0, 2);
  /// `PUT`, `0.03`.
  pub const PUT: Self = Self::new(0, 3);
  /// `DELETE`, `0.04`.
  pub const DELETE: Self = Self::new(0, 4);

  /// `2.01 Created`.
  pub const CREATED: Self = Self::new(2, 1);
  /// `2.02 Deleted`.
  pub const DELETED: Self = Self::new(2, 2);
  /// `2.03 Valid`.
  pub const VALID: Self = Self::new(2, 3);
  /// `2.04 Changed`.
  pub const CHANGED: Self = Self::new(2, 4);
  /// `2.05 Content`.
  pub const CONTENT: Self = Self::new(2, 5);
  /// `2.31 Continue` (used to acknowledge intermediate Block1 chunks).
  pub const CONTINUE: Self = Self::new(2, 31);

  /// `4.00 Bad Request`.
  pub const BAD_REQUEST: Self = Self::new(4, 0);
  /// `4.02 Bad Option`.
  pub const BAD_OPTION: Self = Self::new(4, 2);
  /// `4.04 Not Found`.
  pub const NOT_FOUND: Self = Self::new(4, 4);
  /// `4.05 Method Not Allowed`.
  pub const METHOD_NOT_ALLOWED: Self = Self::new(4, 5);
  /// `4.06 Not Acceptable`.
  pub const NOT_ACCEPTABLE: Self = Self::new(4, 6);
  /// `4.08 Request Entity Incomplete`.
  pub const REQUEST_ENTITY_INCOMPLETE: Self = Self::new(4, 8);
  /// `4.13 Request Entity Too Large`.
  pub const REQUEST_ENTITY_TOO_LARGE: Self = Self::new(4, 13);

  /// `5.00 Internal Server Error`.
  pub const INTERNAL_SERVER_ERROR: Self = Self::new(5, 0);
  /// `5.03 Service Unavailable`.
  pub const SERVICE_UNAVAILABLE: Self = Self::new(5, 3);
}

impl fmt::Display for Code {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{:02}", self.class, self.detail)
  }
}

impl From<u8> for Code {
  fn from(b: u8) -> Self {
    Code { class: b >> 5, detail: b & 0b0001_1111 }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    ((code.class << 5) & 0b1110_0000) | (code.detail & 0b0001_1111)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_code() {
    assert_eq!(Code::from(0b0100_0101), Code::new(2, 5));
  }

  #[test]
  fn serialize_code() {
    let byte: u8 = Code::new(2, 5).into();
    assert_eq!(byte, 0b0100_0101);
  }

  #[test]
  fn display() {
    assert_eq!(Code::new(4, 4).to_string(), "4.04");
  }

  #[test]
  fn kind() {
    assert_eq!(Code::EMPTY.kind(), CodeKind::Empty);
    assert_eq!(Code::GET.kind(), CodeKind::Request);
    assert_eq!(Code::CONTENT.kind(), CodeKind::Response);
  }
}
