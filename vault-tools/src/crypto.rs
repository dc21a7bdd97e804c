//! AES-256-GCM sealing with a PBKDF2-HMAC-SHA-256 derived key.
//!
//! We use this to encrypt and decrypt data chunks. Cipher is AES-256-GCM,
//! which provides authenticated encryption: `open` fails loudly rather than
//! returning tampered plaintext.

use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::rand::rand_bytes;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};
use vault_api_types::manifest::KdfParams;
use vault_api_types::RepoError;

/// Nonce length for AES-256-GCM as used by the block store's sealed
/// records: 12 random bytes, never reused under the same key.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Holds the derived AES-256 key for the lifetime of one process. The
/// passphrase itself is never retained past [`CryptConfig::derive`].
pub struct CryptConfig {
    cipher: Cipher,
    enc_key: [u8; 32],
}

impl CryptConfig {
    /// Derive the encryption key from a caller-supplied passphrase and the
    /// repository's persisted salt, via PBKDF2-HMAC-SHA-256.
    pub fn derive(passphrase: &[u8], kdf: &KdfParams) -> Result<Self, RepoError> {
        if kdf.iterations < KdfParams::MIN_ITERATIONS {
            return Err(RepoError::ConfigError(format!(
                "KDF iteration count {} is below the minimum of {}",
                kdf.iterations,
                KdfParams::MIN_ITERATIONS
            )));
        }

        let mut enc_key = [0u8; 32];
        pbkdf2_hmac(
            passphrase,
            &kdf.salt,
            kdf.iterations as usize,
            MessageDigest::sha256(),
            &mut enc_key,
        )
        .map_err(|err| RepoError::ConfigError(format!("key derivation failed: {err}")))?;

        Ok(CryptConfig {
            cipher: Cipher::aes_256_gcm(),
            enc_key,
        })
    }

    /// Generate a fresh random salt for `repository init`.
    pub fn random_salt() -> Result<[u8; 16], RepoError> {
        let mut salt = [0u8; 16];
        rand_bytes(&mut salt)
            .map_err(|err| RepoError::ConfigError(format!("unable to generate salt: {err}")))?;
        Ok(salt)
    }

    /// Seal `plaintext` into `nonce ‖ ciphertext ‖ tag` using a fresh random
    /// nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, RepoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand_bytes(&mut nonce)
            .map_err(|err| RepoError::ConfigError(format!("unable to generate nonce: {err}")))?;

        let mut tag = [0u8; TAG_LEN];
        let ciphertext = encrypt_aead(self.cipher, &self.enc_key, Some(&nonce), b"", plaintext, &mut tag)
            .map_err(|err| RepoError::MalformedRecord(format!("seal failed: {err}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len() + TAG_LEN);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    /// Open a `nonce ‖ ciphertext ‖ tag` record. Fails with `AuthFailure` if
    /// the tag does not verify, `MalformedRecord` if it is too short to
    /// contain a nonce and tag.
    pub fn open(&self, record: &[u8]) -> Result<Vec<u8>, RepoError> {
        if record.len() < NONCE_LEN + TAG_LEN {
            return Err(RepoError::MalformedRecord(
                "record shorter than nonce+tag".to_string(),
            ));
        }

        let (nonce, rest) = record.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        decrypt_aead(self.cipher, &self.enc_key, Some(nonce), b"", ciphertext, tag)
            .map_err(|_| RepoError::AuthFailure {
                hash: String::new(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_kdf() -> KdfParams {
        KdfParams {
            salt: [7u8; 16],
            iterations: KdfParams::MIN_ITERATIONS,
        }
    }

    #[test]
    fn seal_then_open_round_trips() {
        let cfg = CryptConfig::derive(b"correct horse battery staple", &test_kdf()).unwrap();
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let record = cfg.seal(plaintext).unwrap();
        let opened = cfg.open(&record).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn open_with_wrong_key_fails_auth() {
        let right = CryptConfig::derive(b"correct passphrase", &test_kdf()).unwrap();
        let wrong = CryptConfig::derive(b"incorrect passphrase", &test_kdf()).unwrap();

        let record = right.seal(b"secret bytes").unwrap();
        let err = wrong.open(&record).unwrap_err();
        assert!(matches!(err, RepoError::AuthFailure { .. }));
    }

    #[test]
    fn open_rejects_truncated_record() {
        let cfg = CryptConfig::derive(b"passphrase", &test_kdf()).unwrap();
        let err = cfg.open(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, RepoError::MalformedRecord(_)));
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let cfg = CryptConfig::derive(b"passphrase", &test_kdf()).unwrap();
        let a = cfg.seal(b"same plaintext").unwrap();
        let b = cfg.seal(b"same plaintext").unwrap();
        assert_ne!(&a[..NONCE_LEN], &b[..NONCE_LEN]);
    }

    #[test]
    fn derive_rejects_low_iteration_counts() {
        let kdf = KdfParams {
            salt: [1u8; 16],
            iterations: 10,
        };
        let err = CryptConfig::derive(b"passphrase", &kdf).unwrap_err();
        assert!(matches!(err, RepoError::ConfigError(_)));
    }
}
