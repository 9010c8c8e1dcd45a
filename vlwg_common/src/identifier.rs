//! The 16-byte shared-secret identifier carried in a VLESS request header.

use std::fmt;

use uuid::Uuid;

/// A 16-byte opaque identifier. Comparisons are byte-wise.
///
/// The canonical textual form is the 8-4-4-4-12 lowercase hex grouping
/// (e.g. `01020304-0506-0708-090a-0b0c0d0e0f10`); the dynamic identity
/// backend keys on the same 16 bytes written as 32 lowercase hex digits
/// with no separators.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identifier([u8; 16]);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum IdentifierParseError {
    #[error("identifier is not valid hex/UUID text")]
    InvalidFormat,
}

impl Identifier {
    pub const LEN: usize = 16;

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Parse the canonical 8-4-4-4-12 hyphenated form.
    pub fn from_canonical(s: &str) -> Result<Self, IdentifierParseError> {
        let uuid = Uuid::parse_str(s).map_err(|_| IdentifierParseError::InvalidFormat)?;
        Ok(Self(*uuid.as_bytes()))
    }

    /// Render the canonical 8-4-4-4-12 hyphenated, lowercase form.
    pub fn to_canonical(&self) -> String {
        Uuid::from_bytes(self.0).hyphenated().to_string()
    }

    /// Parse the 32-character lowercase hex form used as the dynamic
    /// identity backend's key (no separators).
    pub fn from_hex32(s: &str) -> Result<Self, IdentifierParseError> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IdentifierParseError::InvalidFormat);
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in bytes.iter_mut().enumerate() {
            let hi = s.as_bytes()[i * 2];
            let lo = s.as_bytes()[i * 2 + 1];
            *chunk = (hex_digit(hi) << 4) | hex_digit(lo);
        }
        Ok(Self(bytes))
    }

    /// Render the 32-character lowercase hex form with no separators.
    pub fn to_hex32(&self) -> String {
        let mut out = String::with_capacity(32);
        for b in &self.0 {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    /// Constant-time equality: every byte is compared regardless of
    /// where the first mismatch falls, and no early return depends on
    /// the comparison's outcome. Used wherever one side of the
    /// comparison is a shared secret (spec §4.2's static identifier).
    pub fn ct_eq(&self, other: &Self) -> bool {
        let mut diff = 0u8;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identifier({})", self.to_canonical())
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_round_trip() {
        let text = "01020304-0506-0708-090a-0b0c0d0e0f10";
        let id = Identifier::from_canonical(text).unwrap();
        assert_eq!(id.to_canonical(), text);
        assert_eq!(
            id.as_bytes(),
            &[
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
                0x0e, 0x0f, 0x10
            ]
        );
    }

    #[test]
    fn hex32_round_trip() {
        let id = Identifier::from_canonical("01020304-0506-0708-090a-0b0c0d0e0f10").unwrap();
        let hex = id.to_hex32();
        assert_eq!(hex, "0102030405060708090a0b0c0d0e0f10");
        assert_eq!(Identifier::from_hex32(&hex).unwrap(), id);
    }

    #[test]
    fn rejects_malformed_text() {
        assert_eq!(
            Identifier::from_canonical("not-a-uuid"),
            Err(IdentifierParseError::InvalidFormat)
        );
        assert_eq!(
            Identifier::from_hex32("short"),
            Err(IdentifierParseError::InvalidFormat)
        );
    }

    #[test]
    fn byte_wise_equality() {
        let a = Identifier::from_bytes([0u8; 16]);
        let b = Identifier::from_bytes([0u8; 16]);
        let mut c_bytes = [0u8; 16];
        c_bytes[15] = 1;
        let c = Identifier::from_bytes(c_bytes);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn ct_eq_agrees_with_partial_eq() {
        let a = Identifier::from_bytes([7u8; 16]);
        let b = Identifier::from_bytes([7u8; 16]);
        let mut c_bytes = [7u8; 16];
        c_bytes[0] = 8;
        let c = Identifier::from_bytes(c_bytes);
        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }
}
