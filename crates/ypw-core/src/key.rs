use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use subtle::ConstantTimeEq;

use crate::cipher::CryptoError;
use crate::secure_buffer::SecureBuffer;
use crate::secure_memory::PageLock;

pub const KEY_LEN: usize = 32;

// The container format stores no salt, so derivation uses one fixed
// application salt and is a pure function of the passphrase.
const CONTAINER_SALT: &[u8] = b"ypw/container-key/v1";

const KDF_MEMORY_MIN_KIB: u32 = 8 * 1024;
const KDF_MEMORY_MAX_KIB: u32 = 1024 * 1024;
const KDF_ITERATIONS_MIN: u32 = 1;
const KDF_ITERATIONS_MAX: u32 = 10;
const KDF_PARALLELISM_MIN: u32 = 1;
const KDF_PARALLELISM_MAX: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    pub fn validate(self) -> Result<(), CryptoError> {
        validate_range(
            self.memory_kib,
            KDF_MEMORY_MIN_KIB,
            KDF_MEMORY_MAX_KIB,
            "argon_m_kib",
        )?;
        validate_range(
            self.iterations,
            KDF_ITERATIONS_MIN,
            KDF_ITERATIONS_MAX,
            "argon_t",
        )?;
        validate_range(
            self.parallelism,
            KDF_PARALLELISM_MIN,
            KDF_PARALLELISM_MAX,
            "argon_p",
        )?;
        Ok(())
    }
}

/// Turns a passphrase into key material of `output.len()` bytes.
pub trait KeyDerivation {
    fn derive_into(&self, passphrase: &[u8], output: &mut [u8]) -> Result<(), CryptoError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Argon2id(pub KdfParams);

impl KeyDerivation for Argon2id {
    fn derive_into(&self, passphrase: &[u8], output: &mut [u8]) -> Result<(), CryptoError> {
        self.0.validate()?;
        let params = Params::new(
            self.0.memory_kib,
            self.0.iterations,
            self.0.parallelism,
            Some(output.len()),
        )
        .map_err(|_| CryptoError::KdfFailure)?;
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(passphrase, CONTAINER_SALT, output)
            .map_err(|_| CryptoError::KdfFailure)
    }
}

pub struct Key {
    // Declared first so the pages are unlocked before the buffer is wiped
    // and freed.
    _pin: PageLock,
    material: SecureBuffer,
}

impl Key {
    pub fn from_passphrase(passphrase: &[u8]) -> Result<Self, CryptoError> {
        Self::derive(passphrase, &Argon2id::default())
    }

    pub fn derive(passphrase: &[u8], kdf: &impl KeyDerivation) -> Result<Self, CryptoError> {
        let mut material = SecureBuffer::allocate(KEY_LEN as u32)?;
        kdf.derive_into(passphrase, material.as_mut_slice())?;
        let _pin = PageLock::engage("key", material.as_slice());
        Ok(Self { _pin, material })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.material.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.material.is_empty()
    }

    pub(crate) fn material(&self) -> &[u8] {
        self.material.as_slice()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.material().ct_eq(other.material()))
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("len", &self.material.len())
            .field("material", &"<redacted>")
            .finish()
    }
}

fn validate_range(value: u32, min: u32, max: u32, field: &'static str) -> Result<(), CryptoError> {
    if !(min..=max).contains(&value) {
        return Err(CryptoError::KdfOutOfBounds {
            field,
            value,
            min,
            max,
        });
    }

    Ok(())
}
