//! WebSocket upgrade handshake (`Connection: Upgrade`, RFC 6455 §1.3).

use crate::errors::ErrorKind;
use base64::{engine::general_purpose::STANDARD, Engine};
use sha1::{Digest, Sha1};

const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
///
/// The key must be present and syntactically valid base64; this function
/// does not itself decode it, only re-encodes the SHA-1 digest of the
/// concatenation with the handshake GUID, per RFC 6455.
pub(crate) fn accept_key(key: &[u8]) -> Result<String, ErrorKind> {
    if !is_base64_syntax(key) {
        return Err(ErrorKind::UpgradePrecondition);
    }

    let mut hasher = Sha1::new();
    hasher.update(key);
    hasher.update(GUID);
    let digest = hasher.finalize();

    Ok(STANDARD.encode(digest))
}

fn is_base64_syntax(value: &[u8]) -> bool {
    !value.is_empty()
        && value
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc6455_example() {
        let key = b"dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(accept_key(key).unwrap(), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn rejects_non_base64_key() {
        assert_eq!(
            accept_key(b"not base64!!"),
            Err(ErrorKind::UpgradePrecondition)
        );
    }

    #[test]
    fn rejects_empty_key() {
        assert_eq!(accept_key(b""), Err(ErrorKind::UpgradePrecondition));
    }
}
