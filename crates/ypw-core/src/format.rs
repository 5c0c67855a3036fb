//! On-disk layout of a container file.
//!
//! ```text
//! "YAPET1.0"                      8 bytes
//! [len: u32 BE][sealed header]    header chunk, opens to 25 bytes
//! [len: u32 BE][sealed record]    zero or more record chunks, until EOF
//! ```

use std::io::{self, Read};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

use crate::cipher::{Cipher, CryptoError};
use crate::key::Key;
use crate::record::{FixedLayout, Record};
use crate::secure_buffer::{BufferError, SecureBuffer};

pub const IDENTIFIER: &[u8; IDENTIFIER_LEN] = b"YAPET1.0";
pub const IDENTIFIER_LEN: usize = 8;
pub const LENGTH_PREFIX_LEN: usize = 4;
pub const HEADER_VERSION: u8 = 1;
pub const CONTROL_LEN: usize = 20;
pub const CONTROL_STRING: &[u8; CONTROL_LEN] = b"ABCDEFGHIJKLMNOPQRST";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("file is empty")]
    Empty,
    #[error("file does not start with the container identifier")]
    BadIdentifier,
    #[error("file ends inside the {0}")]
    Truncated(&'static str),
    #[error("chunk claims {claimed} bytes but only {remaining} remain")]
    LengthExceedsRemaining { claimed: u32, remaining: u64 },
    #[error("chunk of {0} bytes does not fit a 32-bit length prefix")]
    ChunkTooLarge(usize),
    #[error("malformed {0}")]
    Malformed(&'static str),
    #[error("header does not open under this key")]
    InvalidPassword,
    #[error(transparent)]
    Crypto(CryptoError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<CryptoError> for FormatError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::Buffer(error) => Self::Buffer(error),
            other => Self::Crypto(other),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Zeroize)]
pub struct FileHeader {
    version: u8,
    control: [u8; CONTROL_LEN],
    password_set_at: u32,
}

impl FileHeader {
    #[must_use]
    pub fn new(password_set_at: u32) -> Self {
        Self {
            version: HEADER_VERSION,
            control: *CONTROL_STRING,
            password_set_at,
        }
    }

    /// A fresh header stamped with the current time.
    #[must_use]
    pub fn stamped_now() -> Self {
        Self::new(unix_seconds_now())
    }

    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Seconds since the Unix epoch at which the passphrase was last set.
    #[must_use]
    pub fn password_set_at(&self) -> u32 {
        self.password_set_at
    }

    #[must_use]
    pub fn password_set_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.password_set_at))
    }

    #[must_use]
    pub fn has_valid_control(&self) -> bool {
        bool::from(self.control[..].ct_eq(&CONTROL_STRING[..]))
    }
}

impl std::fmt::Debug for FileHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHeader")
            .field("version", &self.version)
            .field("control_ok", &self.has_valid_control())
            .field("password_set_at", &self.password_set_at)
            .finish()
    }
}

impl FixedLayout for FileHeader {
    const SIZE: usize = 1 + CONTROL_LEN + 4;

    fn encode(&self, out: &mut [u8]) {
        out[0] = self.version;
        out[1..=CONTROL_LEN].copy_from_slice(&self.control);
        out[1 + CONTROL_LEN..Self::SIZE].copy_from_slice(&self.password_set_at.to_be_bytes());
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut control = [0_u8; CONTROL_LEN];
        control.copy_from_slice(&bytes[1..=CONTROL_LEN]);
        let mut stamp = [0_u8; 4];
        stamp.copy_from_slice(&bytes[1 + CONTROL_LEN..Self::SIZE]);
        Self {
            version: bytes[0],
            control,
            password_set_at: u32::from_be_bytes(stamp),
        }
    }
}

/// Big-endian length prefix for a chunk of `len` bytes.
pub fn encode_length(len: usize) -> Result<[u8; LENGTH_PREFIX_LEN], FormatError> {
    let len = u32::try_from(len).map_err(|_| FormatError::ChunkTooLarge(len))?;
    Ok(len.to_be_bytes())
}

#[must_use]
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_LEN]) -> u32 {
    u32::from_be_bytes(prefix)
}

pub fn check_identifier(leading: &[u8]) -> Result<(), FormatError> {
    if leading.is_empty() {
        return Err(FormatError::Empty);
    }
    match leading.get(..IDENTIFIER_LEN) {
        Some(found) if found == IDENTIFIER => Ok(()),
        _ => Err(FormatError::BadIdentifier),
    }
}

pub fn seal_header(key: &Key, header: &FileHeader) -> Result<SecureBuffer, CryptoError> {
    Cipher::new(key).encrypt_record(&Record::new(header)?)
}

/// Opens a header chunk. A chunk that fails authentication, or opens to the
/// wrong control string, means the key is wrong.
pub fn open_header(key: &Key, sealed: &[u8]) -> Result<FileHeader, FormatError> {
    let record = match Cipher::new(key).decrypt_record::<FileHeader>(sealed) {
        Ok(record) => record,
        Err(CryptoError::Authentication) => return Err(FormatError::InvalidPassword),
        Err(CryptoError::Malformed { .. }) => {
            return Err(FormatError::Malformed("sealed header"));
        }
        Err(CryptoError::RecordSize { .. }) => {
            return Err(FormatError::Malformed("header width"));
        }
        Err(other) => return Err(other.into()),
    };

    let header = record.value();
    if !header.has_valid_control() {
        return Err(FormatError::InvalidPassword);
    }
    if header.version() != HEADER_VERSION {
        return Err(FormatError::Malformed("header version"));
    }
    Ok(header)
}

/// Reads length-prefixed chunks from `source`, which must hold exactly
/// `remaining` more bytes.
pub struct ChunkReader<R> {
    source: R,
    remaining: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(source: R, remaining: u64) -> Self {
        Self { source, remaining }
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// `Ok(None)` at a clean end of input; any partial prefix or short chunk
    /// is an error naming `what` was being read.
    pub fn next_chunk(&mut self, what: &'static str) -> Result<Option<SecureBuffer>, FormatError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        if self.remaining < LENGTH_PREFIX_LEN as u64 {
            return Err(FormatError::Truncated(what));
        }

        let mut prefix = [0_u8; LENGTH_PREFIX_LEN];
        read_exact_or_truncated(&mut self.source, &mut prefix, what)?;
        self.remaining -= LENGTH_PREFIX_LEN as u64;

        let claimed = decode_length(prefix);
        if u64::from(claimed) > self.remaining {
            return Err(FormatError::LengthExceedsRemaining {
                claimed,
                remaining: self.remaining,
            });
        }

        let mut chunk = SecureBuffer::allocate(claimed)?;
        read_exact_or_truncated(&mut self.source, chunk.as_mut_slice(), what)?;
        self.remaining -= u64::from(claimed);
        Ok(Some(chunk))
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

fn read_exact_or_truncated<R: Read>(
    source: &mut R,
    buf: &mut [u8],
    what: &'static str,
) -> Result<(), FormatError> {
    source.read_exact(buf).map_err(|error| {
        if error.kind() == io::ErrorKind::UnexpectedEof {
            FormatError::Truncated(what)
        } else {
            FormatError::Io(error)
        }
    })
}

fn unix_seconds_now() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    u32::try_from(secs).unwrap_or(u32::MAX)
}
