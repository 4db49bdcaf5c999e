//! Attachment encryption.
//!
//! Whole-file, single-shot: the same primitive and the same conversation key
//! as text messages, no chunking. What the relay stores is
//! `nonce || ciphertext+tag` (see `Sealed::to_wire`).
//!
//! After decryption the content type is recovered from a small set of magic
//! numbers when the sender did not declare one. Sniffing never blocks the
//! decrypted bytes from being returned.

use crate::{
    conversation::{ConversationKey, Sealed},
    aead,
    error::CryptoError,
};

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Decrypted attachment plus the content type that will be shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
    /// True when `mime` came from magic-number sniffing rather than the sender.
    pub sniffed: bool,
}

pub fn encrypt_blob(bytes: &[u8], key: &ConversationKey) -> Result<Sealed, CryptoError> {
    crate::conversation::encrypt(bytes, key)
}

/// Unlike message decryption, failure here is an error the caller must see:
/// the user asked for this file.
pub fn decrypt_blob(
    ciphertext: &[u8],
    nonce: &[u8],
    key: &ConversationKey,
    declared_mime: Option<&str>,
) -> Result<DecryptedBlob, CryptoError> {
    let bytes = aead::open(key.as_bytes(), nonce, ciphertext, b"")?.to_vec();

    let declared = declared_mime
        .map(str::trim)
        .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case(OCTET_STREAM));

    let (mime, sniffed) = match declared {
        Some(m) => (m.to_string(), false),
        None => match sniff_mime(&bytes) {
            Some(m) => (m.to_string(), true),
            None => (OCTET_STREAM.to_string(), false),
        },
    };

    Ok(DecryptedBlob { bytes, mime, sniffed })
}

/// Decrypt a blob exactly as downloaded from the relay (`nonce || ct`).
/// A truncated download is reported as `AeadDecrypt`, never as valid data.
pub fn decrypt_blob_wire(
    wire: &[u8],
    key: &ConversationKey,
    declared_mime: Option<&str>,
) -> Result<DecryptedBlob, CryptoError> {
    let sealed = Sealed::from_wire(wire).map_err(|_| CryptoError::AeadDecrypt)?;
    decrypt_blob(&sealed.ciphertext, &sealed.nonce, key, declared_mime)
}

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF];
const GIF87: &[u8] = b"GIF87a";
const GIF89: &[u8] = b"GIF89a";

/// PNG / JPEG / GIF / WEBP only.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG) {
        Some("image/png")
    } else if bytes.starts_with(JPEG) {
        Some("image/jpeg")
    } else if bytes.starts_with(GIF87) || bytes.starts_with(GIF89) {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ConversationKey {
        ConversationKey::from_bytes([42u8; 32])
    }

    fn png_bytes(len: usize) -> Vec<u8> {
        let mut v = PNG.to_vec();
        v.extend((0..len).map(|i| (i % 251) as u8));
        v
    }

    #[test]
    fn five_megabyte_png_roundtrip_with_sniffing() {
        let original = png_bytes(5 * 1024 * 1024);
        let sealed = encrypt_blob(&original, &key()).unwrap();
        let out = decrypt_blob_wire(&sealed.to_wire(), &key(), None).unwrap();
        assert_eq!(out.bytes, original);
        assert_eq!(out.mime, "image/png");
        assert!(out.sniffed);
    }

    #[test]
    fn declared_mime_wins_over_sniffing() {
        let sealed = encrypt_blob(&png_bytes(16), &key()).unwrap();
        let out = decrypt_blob(&sealed.ciphertext, &sealed.nonce, &key(), Some("image/x-custom")).unwrap();
        assert_eq!(out.mime, "image/x-custom");
        assert!(!out.sniffed);
    }

    #[test]
    fn octet_stream_declaration_is_treated_as_unknown() {
        let sealed = encrypt_blob(b"GIF89a....", &key()).unwrap();
        let out = decrypt_blob(&sealed.ciphertext, &sealed.nonce, &key(), Some(OCTET_STREAM)).unwrap();
        assert_eq!(out.mime, "image/gif");
    }

    #[test]
    fn unknown_content_falls_back_to_octet_stream() {
        let sealed = encrypt_blob(b"%PDF-1.7", &key()).unwrap();
        let out = decrypt_blob(&sealed.ciphertext, &sealed.nonce, &key(), None).unwrap();
        assert_eq!(out.mime, OCTET_STREAM);
        assert_eq!(out.bytes, b"%PDF-1.7");
    }

    #[test]
    fn sniffs_all_supported_signatures() {
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"GIF87a"), Some("image/gif"));
        assert_eq!(sniff_mime(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"RIFF\x00\x00\x00\x00WAVE"), None);
        assert_eq!(sniff_mime(b""), None);
    }

    #[test]
    fn corrupted_or_truncated_download_is_an_error() {
        let sealed = encrypt_blob(&png_bytes(64), &key()).unwrap();
        let mut wire = sealed.to_wire();
        let last = wire.len() - 1;
        wire[last] ^= 0x01;
        assert!(matches!(decrypt_blob_wire(&wire, &key(), None), Err(CryptoError::AeadDecrypt)));
        assert!(matches!(decrypt_blob_wire(&wire[..10], &key(), None), Err(CryptoError::AeadDecrypt)));
    }
}
