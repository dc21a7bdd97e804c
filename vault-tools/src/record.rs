//! Glues compression and encryption into the one-byte-flag sealed record
//! format of the GLOSSARY: `flags ‖ nonce ‖ ciphertext ‖ tag`. This is the
//! exact byte sequence the block store persists and the client produces
//! before calling `put_chunk`.

use vault_api_types::RepoError;

use crate::compression::{compress_chunk, decompress_chunk};
use crate::crypto::CryptConfig;

/// Compress `plaintext` (gated by `mime_category`), then seal it, prefixing
/// the result with the one-byte compression flag.
pub fn seal_chunk(
    crypto: &CryptConfig,
    plaintext: &[u8],
    mime_category: Option<&str>,
) -> Result<Vec<u8>, RepoError> {
    let (flag, payload) = compress_chunk(plaintext, mime_category)?;
    let sealed = crypto.seal(&payload)?;
    let mut record = Vec::with_capacity(1 + sealed.len());
    record.push(flag);
    record.extend_from_slice(&sealed);
    Ok(record)
}

/// Undo [`seal_chunk`]: split off the flag byte, open the AEAD record, then
/// decompress if the flag says so.
pub fn open_chunk(crypto: &CryptConfig, record: &[u8]) -> Result<Vec<u8>, RepoError> {
    let (flag, sealed) = record
        .split_first()
        .ok_or_else(|| RepoError::MalformedRecord("empty sealed record".to_string()))?;
    let payload = crypto.open(sealed)?;
    decompress_chunk(*flag, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vault_api_types::manifest::KdfParams;

    fn crypto() -> CryptConfig {
        CryptConfig::derive(
            b"passphrase",
            &KdfParams {
                salt: [3u8; 16],
                iterations: KdfParams::MIN_ITERATIONS,
            },
        )
        .unwrap()
    }

    #[test]
    fn seal_then_open_round_trips_compressible_text() {
        let crypto = crypto();
        let plaintext = "hello world ".repeat(100);
        let record = seal_chunk(&crypto, plaintext.as_bytes(), Some("text")).unwrap();
        let opened = open_chunk(&crypto, &record).unwrap();
        assert_eq!(opened, plaintext.as_bytes());
    }

    #[test]
    fn seal_then_open_round_trips_incompressible_binary() {
        let crypto = crypto();
        let plaintext = vec![0x77u8; 2048];
        let record = seal_chunk(&crypto, &plaintext, Some("binary")).unwrap();
        let opened = open_chunk(&crypto, &record).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_empty_record_is_malformed() {
        let crypto = crypto();
        assert!(matches!(
            open_chunk(&crypto, &[]).unwrap_err(),
            RepoError::MalformedRecord(_)
        ));
    }
}
