use chacha20poly1305::aead::Aead;
use chacha20poly1305::{KeyInit, XChaCha20Poly1305, XNonce};
use thiserror::Error;

use crate::key::Key;
use crate::record::{FixedLayout, Record, RecordError};
use crate::secure_buffer::{BufferError, SecureBuffer};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("passphrase derivation failed")]
    KdfFailure,
    #[error("{field} out of bounds: {value} (expected {min}..={max})")]
    KdfOutOfBounds {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    #[error("key material has the wrong length")]
    InvalidKeyLength,
    #[error("randomness source failed")]
    RandomFailure,
    #[error("encryption failed")]
    EncryptionFailure,
    #[error("ciphertext of {len} bytes is shorter than the {minimum}-byte envelope")]
    Malformed { len: usize, minimum: usize },
    #[error("authentication failed")]
    Authentication,
    #[error("decrypted record is {actual} bytes, expected {expected}")]
    RecordSize { expected: usize, actual: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl From<RecordError> for CryptoError {
    fn from(error: RecordError) -> Self {
        match error {
            RecordError::SizeMismatch { expected, actual } => Self::RecordSize { expected, actual },
            RecordError::Buffer(error) => Self::Buffer(error),
        }
    }
}

/// XChaCha20-Poly1305 under a borrowed [`Key`].
///
/// Sealed output is `nonce || ciphertext || tag`; the nonce is drawn fresh
/// for every call, so the key alone is enough to open it again.
#[derive(Debug, Clone, Copy)]
pub struct Cipher<'k> {
    key: &'k Key,
}

impl<'k> Cipher<'k> {
    #[must_use]
    pub fn new(key: &'k Key) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<SecureBuffer, CryptoError> {
        let aead = self.aead()?;
        let mut nonce = [0_u8; NONCE_LEN];
        getrandom::fill(&mut nonce).map_err(|_| CryptoError::RandomFailure)?;

        let body = aead
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::EncryptionFailure)?;
        let total = NONCE_LEN + body.len();
        let mut sealed =
            SecureBuffer::allocate(u32::try_from(total).map_err(|_| BufferError::TooLarge(total))?)?;
        sealed[..NONCE_LEN].copy_from_slice(&nonce);
        sealed[NONCE_LEN..].copy_from_slice(&body);
        Ok(sealed)
    }

    pub fn decrypt(&self, sealed: &[u8]) -> Result<SecureBuffer, CryptoError> {
        if sealed.len() < SEAL_OVERHEAD {
            return Err(CryptoError::Malformed {
                len: sealed.len(),
                minimum: SEAL_OVERHEAD,
            });
        }

        let aead = self.aead()?;
        let (nonce, body) = sealed.split_at(NONCE_LEN);
        let plaintext = aead
            .decrypt(XNonce::from_slice(nonce), body)
            .map_err(|_| CryptoError::Authentication)?;
        Ok(SecureBuffer::from_vec(plaintext)?)
    }

    pub fn encrypt_record<T: FixedLayout>(
        &self,
        record: &Record<T>,
    ) -> Result<SecureBuffer, CryptoError> {
        self.encrypt(record.as_bytes())
    }

    pub fn decrypt_record<T: FixedLayout>(&self, sealed: &[u8]) -> Result<Record<T>, CryptoError> {
        let plaintext = self.decrypt(sealed)?;
        Ok(Record::from_buffer(plaintext)?)
    }

    fn aead(&self) -> Result<XChaCha20Poly1305, CryptoError> {
        XChaCha20Poly1305::new_from_slice(self.key.material())
            .map_err(|_| CryptoError::InvalidKeyLength)
    }
}

#[cfg(test)]
mod tests {
    use super::{Cipher, CryptoError, NONCE_LEN, SEAL_OVERHEAD};
    use crate::key::tests::test_key;
    use crate::password_record::{PasswordRecord, PASSWORD_SIZE};
    use crate::record::Record;

    #[test]
    fn sealed_output_round_trips() {
        let key = test_key(b"hunter2");
        let cipher = Cipher::new(&key);

        let sealed = cipher.encrypt(b"attack at dawn").expect("encrypt");
        assert_eq!(sealed.len(), b"attack at dawn".len() + SEAL_OVERHEAD);
        let opened = cipher.decrypt(&sealed).expect("decrypt");
        assert_eq!(opened.as_slice(), b"attack at dawn");

        let empty = cipher.encrypt(&[]).expect("encrypt empty");
        assert!(cipher.decrypt(&empty).expect("decrypt empty").is_empty());
    }

    #[test]
    fn nonce_is_fresh_per_call() {
        let key = test_key(b"hunter2");
        let cipher = Cipher::new(&key);
        let first = cipher.encrypt(b"same").expect("encrypt");
        let second = cipher.encrypt(b"same").expect("encrypt");
        assert_ne!(first[..NONCE_LEN], second[..NONCE_LEN]);
    }

    #[test]
    fn short_input_is_malformed() {
        let key = test_key(b"hunter2");
        assert_eq!(
            Cipher::new(&key).decrypt(&[0_u8; SEAL_OVERHEAD - 1]),
            Err(CryptoError::Malformed {
                len: SEAL_OVERHEAD - 1,
                minimum: SEAL_OVERHEAD
            })
        );
    }

    #[test]
    fn wrong_key_and_tampering_fail_authentication() {
        let key = test_key(b"hunter2");
        let other = test_key(b"wrong");
        let mut sealed = Cipher::new(&key).encrypt(b"secret").expect("encrypt");

        assert_eq!(
            Cipher::new(&other).decrypt(&sealed),
            Err(CryptoError::Authentication)
        );

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(
            Cipher::new(&key).decrypt(&sealed),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn record_round_trip_is_byte_exact() {
        let key = test_key(b"hunter2");
        let cipher = Cipher::new(&key);
        let record = Record::new(&PasswordRecord::with_fields(
            b"site",
            b"example.org",
            b"bob",
            &[b'p'; PASSWORD_SIZE + 5],
            b"",
        ))
        .expect("record");

        let sealed = cipher.encrypt_record(&record).expect("encrypt");
        let opened = cipher
            .decrypt_record::<PasswordRecord>(&sealed)
            .expect("decrypt");
        assert_eq!(opened.as_bytes(), record.as_bytes());
    }

    #[test]
    fn record_width_is_checked_after_decryption() {
        let key = test_key(b"hunter2");
        let cipher = Cipher::new(&key);
        let sealed = cipher.encrypt(&[1, 2, 3]).expect("encrypt");
        assert_eq!(
            cipher.decrypt_record::<PasswordRecord>(&sealed).map(|_| ()),
            Err(CryptoError::RecordSize {
                expected: 1408,
                actual: 3
            })
        );
    }
}
