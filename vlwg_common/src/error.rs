//! Shared error taxonomy (spec §7). The header codec raises its own
//! [`crate::header::ParseError`]; this enum is the session-level
//! classification the tunnel engine uses to decide how to close a
//! connection and what to log.

use std::fmt;

use crate::header::ParseError;

/// Top-level classification of everything that can end a tunnel session.
#[derive(Debug, Clone)]
pub enum ErrorKind {
    /// Header codec failure, bad early data, or a header-phase timeout.
    MalformedHeader(MalformedReason),
    /// The identifier was not recognized by either identity backend.
    AuthRejected,
    /// UDP command with a port other than 53, or UDP-53 when the DNS
    /// specialisation is unavailable.
    UnsupportedUdp,
    /// Outbound TCP dial failed (primary or fallback).
    DialFailed(String),
    /// Read/write failed mid-stream, or an idle/connect timeout elapsed
    /// during the streaming phase.
    TransportError(String),
}

#[derive(Debug, Clone)]
pub enum MalformedReason {
    Header(ParseError),
    BadEarlyData,
    HeaderTimeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedHeader(reason) => write!(f, "malformed header: {reason}"),
            ErrorKind::AuthRejected => write!(f, "identifier rejected"),
            ErrorKind::UnsupportedUdp => write!(f, "unsupported UDP request"),
            ErrorKind::DialFailed(cause) => write!(f, "dial failed: {cause}"),
            ErrorKind::TransportError(cause) => write!(f, "transport error: {cause}"),
        }
    }
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::Header(e) => write!(f, "{e}"),
            MalformedReason::BadEarlyData => write!(f, "early data failed to decode"),
            MalformedReason::HeaderTimeout => write!(f, "timed out waiting for header"),
        }
    }
}

impl From<ParseError> for ErrorKind {
    fn from(e: ParseError) -> Self {
        ErrorKind::MalformedHeader(MalformedReason::Header(e))
    }
}

/// WebSocket close codes the engine uses, named per spec §7's propagation
/// policy (no payload beyond the close code is ever sent to the peer).
pub mod close_code {
    /// RFC 6455 1002 — protocol error (malformed header / bad early data).
    pub const PROTOCOL_ERROR: u16 = 1002;
    /// RFC 6455 1008 — policy violation (auth rejected, unsupported UDP).
    pub const POLICY_VIOLATION: u16 = 1008;
    /// RFC 6455 1011 — unexpected condition (dial/transport failure).
    pub const INTERNAL_ERROR: u16 = 1011;
}

impl ErrorKind {
    /// The WebSocket close code to send for this error, per spec §7.
    pub fn close_code(&self) -> u16 {
        match self {
            ErrorKind::MalformedHeader(_) | ErrorKind::UnsupportedUdp => {
                close_code::PROTOCOL_ERROR
            }
            ErrorKind::AuthRejected => close_code::POLICY_VIOLATION,
            ErrorKind::DialFailed(_) | ErrorKind::TransportError(_) => close_code::INTERNAL_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejected_is_policy_violation() {
        assert_eq!(ErrorKind::AuthRejected.close_code(), close_code::POLICY_VIOLATION);
    }

    #[test]
    fn malformed_header_is_protocol_error() {
        let err: ErrorKind = ParseError::TooShort.into();
        assert_eq!(err.close_code(), close_code::PROTOCOL_ERROR);
    }

    #[test]
    fn unsupported_udp_does_not_leak_auth_state() {
        // UnsupportedUDP and MalformedHeader share a close code so a peer
        // cannot distinguish "bad header" from "bad command" from the code
        // alone, matching spec §7's "treated as MalformedHeader for close
        // purposes".
        assert_eq!(
            ErrorKind::UnsupportedUdp.close_code(),
            ErrorKind::from(ParseError::TooShort).close_code()
        );
    }
}
