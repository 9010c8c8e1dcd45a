//! VLESS request-header codec (C1).
//!
//! Layout (offsets in bytes), see spec §4.1:
//!
//! ```text
//! 0         : version
//! 1..17     : identifier (16 bytes)
//! 17        : optionsLength O
//! 18..18+O  : options (opaque, skipped)
//! 18+O      : command
//! 19+O..21+O: port (uint16 big-endian)
//! 21+O      : addressType
//! 22+O..    : address (length determined by addressType)
//! ```

use crate::identifier::Identifier;

/// The destination command carried in a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
}

/// The address-type tag from the wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    IPv4,
    DomainName,
    IPv6,
}

/// A successfully parsed VLESS request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlessRequest {
    pub version: u8,
    pub identifier: Identifier,
    pub command: Command,
    pub port: u16,
    pub address_type: AddressType,
    /// Canonical textual destination: dotted-quad, UTF-8 domain label, or
    /// colon-separated 8-group hex (no zero-compression).
    pub address: String,
    /// Byte index into the original chunk at which client application data
    /// (the residual payload) begins.
    pub payload_offset: usize,
}

/// Reasons a header fails to parse, per spec §4.1/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("chunk shorter than the minimum 24-byte header")]
    TooShort,
    #[error("unrecognized address type byte {0}")]
    BadAddressType(u8),
    #[error("unsupported command {command}, port {port:?}")]
    UnsupportedCommand { command: u8, port: Option<u16> },
    #[error("address field decoded to an empty string")]
    EmptyAddress,
}

const MIN_HEADER_LEN: usize = 24;

/// Parse the first inbound chunk into a [`VlessRequest`].
///
/// Purely functional: allocates the result, mutates nothing, and never
/// touches bytes past `payload_offset`.
pub fn parse(chunk: &[u8]) -> Result<VlessRequest, ParseError> {
    if chunk.len() < MIN_HEADER_LEN {
        return Err(ParseError::TooShort);
    }

    let version = chunk[0];
    let mut identifier_bytes = [0u8; 16];
    identifier_bytes.copy_from_slice(&chunk[1..17]);
    let identifier = Identifier::from_bytes(identifier_bytes);

    let options_len = chunk[17] as usize;
    let command_offset = 18 + options_len;
    let port_offset = command_offset + 1;
    let address_type_offset = port_offset + 2;
    let address_offset = address_type_offset + 1;

    if chunk.len() < address_offset {
        return Err(ParseError::TooShort);
    }

    let raw_command = chunk[command_offset];
    let port = u16::from_be_bytes([chunk[port_offset], chunk[port_offset + 1]]);

    let command = match raw_command {
        1 => Command::Tcp,
        2 if port == 53 => Command::Udp,
        2 => {
            return Err(ParseError::UnsupportedCommand {
                command: raw_command,
                port: Some(port),
            })
        }
        other => {
            return Err(ParseError::UnsupportedCommand {
                command: other,
                port: None,
            })
        }
    };

    let raw_address_type = chunk[address_type_offset];
    let address_type = match raw_address_type {
        1 => AddressType::IPv4,
        2 => AddressType::DomainName,
        3 => AddressType::IPv6,
        other => return Err(ParseError::BadAddressType(other)),
    };

    let (address, payload_offset) = match address_type {
        AddressType::IPv4 => {
            if chunk.len() < address_offset + 4 {
                return Err(ParseError::TooShort);
            }
            let b = &chunk[address_offset..address_offset + 4];
            (format!("{}.{}.{}.{}", b[0], b[1], b[2], b[3]), address_offset + 4)
        }
        AddressType::IPv6 => {
            if chunk.len() < address_offset + 16 {
                return Err(ParseError::TooShort);
            }
            let b = &chunk[address_offset..address_offset + 16];
            let groups: Vec<String> = b
                .chunks(2)
                .map(|pair| format!("{:x}", u16::from_be_bytes([pair[0], pair[1]])))
                .collect();
            (groups.join(":"), address_offset + 16)
        }
        AddressType::DomainName => {
            if chunk.len() < address_offset + 1 {
                return Err(ParseError::TooShort);
            }
            let len = chunk[address_offset] as usize;
            let label_start = address_offset + 1;
            if chunk.len() < label_start + len {
                return Err(ParseError::TooShort);
            }
            let label = std::str::from_utf8(&chunk[label_start..label_start + len])
                .map_err(|_| ParseError::EmptyAddress)?;
            (label.to_string(), label_start + len)
        }
    };

    if address.is_empty() {
        return Err(ParseError::EmptyAddress);
    }

    Ok(VlessRequest {
        version,
        identifier,
        command,
        port,
        address_type,
        address,
        payload_offset,
    })
}

/// Build the two-byte VLESS response header: `{version, 0x00}`.
pub fn build_response_header(version: u8) -> [u8; 2] {
    [version, 0x00]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_chunk(payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0x00]; // version
        buf.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]); // id
        buf.push(0x00); // optionsLength
        buf.push(0x01); // command = TCP
        buf.extend_from_slice(&80u16.to_be_bytes()); // port 80
        buf.push(0x01); // addressType = IPv4
        buf.extend_from_slice(&[127, 0, 0, 1]);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn too_short_below_minimum() {
        let short = vec![0u8; 23];
        assert_eq!(parse(&short), Err(ParseError::TooShort));
    }

    #[test]
    fn happy_path_ipv4_scenario() {
        let chunk = ipv4_chunk(b"HELLO");
        let req = parse(&chunk).unwrap();
        assert_eq!(req.version, 0);
        assert_eq!(req.command, Command::Tcp);
        assert_eq!(req.port, 80);
        assert_eq!(req.address_type, AddressType::IPv4);
        assert_eq!(req.address, "127.0.0.1");
        assert_eq!(&chunk[req.payload_offset..], b"HELLO");
    }

    #[test]
    fn domain_name_address() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x00);
        buf.push(0x01); // TCP
        buf.extend_from_slice(&443u16.to_be_bytes());
        buf.push(0x02); // DomainName
        let domain = b"example.com";
        buf.push(domain.len() as u8);
        buf.extend_from_slice(domain);
        buf.extend_from_slice(b"payload");

        let req = parse(&buf).unwrap();
        assert_eq!(req.address, "example.com");
        assert_eq!(req.port, 443);
        assert_eq!(&buf[req.payload_offset..], b"payload");
    }

    #[test]
    fn ipv6_address_no_zero_compression() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x00);
        buf.push(0x01);
        buf.extend_from_slice(&0u16.to_be_bytes());
        buf.push(0x03); // IPv6
        buf.extend_from_slice(&[
            0x20, 0x01, 0x0d, 0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x01,
        ]);

        let req = parse(&buf).unwrap();
        assert_eq!(req.address, "2001:db8:0:0:0:0:0:1");
    }

    #[test]
    fn udp_non_dns_port_rejected() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x00);
        buf.push(0x02); // UDP
        buf.extend_from_slice(&4433u16.to_be_bytes());
        buf.push(0x01);
        buf.extend_from_slice(&[1, 1, 1, 1]);

        assert!(matches!(
            parse(&buf),
            Err(ParseError::UnsupportedCommand {
                command: 2,
                port: Some(4433)
            })
        ));
    }

    #[test]
    fn udp_dns_port_accepted() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x00);
        buf.push(0x02); // UDP
        buf.extend_from_slice(&53u16.to_be_bytes());
        buf.push(0x01);
        buf.extend_from_slice(&[8, 8, 8, 8]);

        let req = parse(&buf).unwrap();
        assert_eq!(req.command, Command::Udp);
        assert_eq!(req.port, 53);
    }

    #[test]
    fn options_bytes_are_skipped_opaquely() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x03); // optionsLength = 3
        buf.extend_from_slice(&[0xde, 0xad, 0xbe]); // opaque options
        buf.push(0x01); // TCP
        buf.extend_from_slice(&8080u16.to_be_bytes());
        buf.push(0x01);
        buf.extend_from_slice(&[10, 0, 0, 1]);
        buf.extend_from_slice(b"after-options");

        let req = parse(&buf).unwrap();
        assert_eq!(req.port, 8080);
        assert_eq!(req.address, "10.0.0.1");
        assert_eq!(&buf[req.payload_offset..], b"after-options");
    }

    #[test]
    fn empty_domain_is_malformed() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x00);
        buf.push(0x01);
        buf.extend_from_slice(&80u16.to_be_bytes());
        buf.push(0x02);
        buf.push(0x00); // zero-length domain

        assert_eq!(parse(&buf), Err(ParseError::EmptyAddress));
    }

    #[test]
    fn bad_address_type_byte() {
        let mut buf = vec![0x00];
        buf.extend_from_slice(&[0u8; 16]);
        buf.push(0x00);
        buf.push(0x01);
        buf.extend_from_slice(&80u16.to_be_bytes());
        buf.push(0x09); // invalid

        assert_eq!(parse(&buf), Err(ParseError::BadAddressType(0x09)));
    }

    #[test]
    fn response_header_echoes_version() {
        assert_eq!(build_response_header(0x00), [0x00, 0x00]);
        assert_eq!(build_response_header(0x07), [0x07, 0x00]);
    }

    #[test]
    fn parse_is_injective_on_header_slice() {
        let chunk_a = ipv4_chunk(b"AAAA");
        let chunk_b = ipv4_chunk(b"BBBB");
        let req_a = parse(&chunk_a).unwrap();
        let req_b = parse(&chunk_b).unwrap();
        assert_eq!(chunk_a[..req_a.payload_offset], chunk_b[..req_b.payload_offset]);
        assert_eq!(req_a.address, req_b.address);
        assert_eq!(req_a.port, req_b.port);
    }
}
