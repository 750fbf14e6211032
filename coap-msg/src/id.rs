/// A CoAP message ID (MID).
///
/// 16-bit unsigned integer in network byte order, used to detect
/// message duplication and to match ACK/RST to their CON/NON.
///
/// See [RFC7252 section 3](https://datatracker.ietf.org/doc/html/rfc7252#section-3).
#[derive(Copy, Clone, Hash, PartialEq, PartialOrd, Debug, Eq, Ord)]
pub struct Id(pub u16);

impl Id {
  pub(crate) fn from_be_bytes(bs: [u8; 2]) -> Self {
    Self(u16::from_be_bytes(bs))
  }

  pub(crate) fn to_be_bytes(self) -> [u8; 2] {
    self.0.to_be_bytes()
  }
}
