//! GZIP compression for chunk payloads, gated by a MIME-category heuristic
//! and a minimum size-reduction threshold.

use std::io::Write;

use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;

use vault_api_types::RepoError;

/// Flag byte prefixed to every pre-encryption record, recording whether the
/// payload that follows is GZIP-compressed. Decompression at restore time is
/// driven entirely by this flag; no heuristic is re-run.
pub const FLAG_PLAIN: u8 = 0;
pub const FLAG_GZIP: u8 = 1;

/// Minimum fractional size reduction required to keep the compressed form.
const MIN_REDUCTION: f64 = 0.05;

/// MIME categories considered compressible by default. A `None` hint is
/// treated as compressible too (attempt compression, keep it only if it
/// pays off).
const COMPRESSIBLE_CATEGORIES: &[&str] = &["text", "source", "json", "xml", "csv"];

/// Whether `mime_category` (e.g. `"text"`, `"image"`) should be attempted
/// for compression. A missing hint is always attempted.
pub fn is_compressible_category(mime_category: Option<&str>) -> bool {
    match mime_category {
        None => true,
        Some(category) => COMPRESSIBLE_CATEGORIES.contains(&category),
    }
}

/// Compress `plaintext` and return `(flag, payload)`. Only returns the
/// compressed form if it is at least [`MIN_REDUCTION`] smaller than the
/// plaintext; otherwise returns the plaintext unchanged with `FLAG_PLAIN`.
pub fn compress_chunk(plaintext: &[u8], mime_category: Option<&str>) -> Result<(u8, Vec<u8>), RepoError> {
    if !is_compressible_category(mime_category) {
        return Ok((FLAG_PLAIN, plaintext.to_vec()));
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(plaintext)
        .map_err(|err| RepoError::MalformedRecord(format!("gzip encode failed: {err}")))?;
    let compressed = encoder
        .finish()
        .map_err(|err| RepoError::MalformedRecord(format!("gzip encode failed: {err}")))?;

    let reduction = 1.0 - (compressed.len() as f64 / plaintext.len().max(1) as f64);
    if !plaintext.is_empty() && reduction >= MIN_REDUCTION {
        Ok((FLAG_GZIP, compressed))
    } else {
        Ok((FLAG_PLAIN, plaintext.to_vec()))
    }
}

/// Undo [`compress_chunk`] given the flag byte it recorded.
pub fn decompress_chunk(flag: u8, payload: &[u8]) -> Result<Vec<u8>, RepoError> {
    match flag {
        FLAG_PLAIN => Ok(payload.to_vec()),
        FLAG_GZIP => {
            let mut decoder = GzDecoder::new(Vec::new());
            decoder
                .write_all(payload)
                .map_err(|err| RepoError::MalformedRecord(format!("gzip decode failed: {err}")))?;
            decoder
                .finish()
                .map_err(|err| RepoError::MalformedRecord(format!("gzip decode failed: {err}")))
        }
        other => Err(RepoError::MalformedRecord(format!(
            "unknown compression flag {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highly_compressible_text_is_compressed() {
        let plaintext = "the quick brown fox jumps over the lazy dog ".repeat(200);
        let (flag, payload) = compress_chunk(plaintext.as_bytes(), Some("text")).unwrap();
        assert_eq!(flag, FLAG_GZIP);
        assert!(payload.len() < plaintext.len());

        let round_tripped = decompress_chunk(flag, &payload).unwrap();
        assert_eq!(round_tripped, plaintext.as_bytes());
    }

    #[test]
    fn incompressible_category_is_stored_plain() {
        let plaintext = vec![0x42u8; 4096];
        let (flag, payload) = compress_chunk(&plaintext, Some("image")).unwrap();
        assert_eq!(flag, FLAG_PLAIN);
        assert_eq!(payload, plaintext);
    }

    #[test]
    fn random_data_falls_back_to_plain_even_with_hint() {
        // Pseudo-random, not actually compressible below the 5% threshold.
        let plaintext: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 8) as u8).collect();
        let (flag, payload) = compress_chunk(&plaintext, Some("text")).unwrap();
        if flag == FLAG_GZIP {
            assert!((payload.len() as f64) <= plaintext.len() as f64 * 0.95);
        } else {
            assert_eq!(payload, plaintext);
        }
    }

    #[test]
    fn missing_hint_is_attempted() {
        assert!(is_compressible_category(None));
    }
}
