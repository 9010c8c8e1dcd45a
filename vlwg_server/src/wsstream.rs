//! WebSocket byte-stream adaptation (C3): early-data extraction and the
//! axum <-> raw-bytes message conversions the tunnel engine pumps over.

use axum::extract::ws::{CloseFrame, Message};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

#[derive(Debug, thiserror::Error)]
pub enum EarlyDataError {
    #[error("early-data header failed to decode")]
    BadEarlyData,
}

/// Decode the `Sec-WebSocket-Protocol` early-data header (spec §4.3).
///
/// The header is base64url (`-`/`_` variant) with padding omitted or
/// partial; padding is inferred before decoding. A missing or empty
/// header contributes no bytes.
pub fn decode_early_data(header: Option<&str>) -> Result<Vec<u8>, EarlyDataError> {
    let Some(raw) = header else {
        return Ok(Vec::new());
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    let unpadded = raw.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(unpadded)
        .map_err(|_| EarlyDataError::BadEarlyData)
}

/// Close code to send when the stream must be torn down with no
/// payload beyond the code itself (spec §7 propagation policy).
pub fn close_message(code: u16) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: String::new().into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_header_yields_no_bytes() {
        assert_eq!(decode_early_data(None).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn empty_header_yields_no_bytes() {
        assert_eq!(decode_early_data(Some("")).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn decodes_unpadded_url_safe_base64() {
        let encoded = URL_SAFE_NO_PAD.encode(b"HELLO");
        assert_eq!(decode_early_data(Some(&encoded)).unwrap(), b"HELLO");
    }

    #[test]
    fn decodes_with_explicit_padding() {
        let mut encoded = URL_SAFE_NO_PAD.encode(b"HI");
        while encoded.len() % 4 != 0 {
            encoded.push('=');
        }
        assert_eq!(decode_early_data(Some(&encoded)).unwrap(), b"HI");
    }

    #[test]
    fn garbage_header_is_bad_early_data() {
        assert!(matches!(
            decode_early_data(Some("not base64!!")),
            Err(EarlyDataError::BadEarlyData)
        ));
    }
}
