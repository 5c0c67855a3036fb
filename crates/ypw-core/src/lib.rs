pub mod cipher;
pub mod format;
pub mod key;
pub mod partdec;
pub mod password_record;
pub mod pwgen;
pub mod record;
pub mod secure_buffer;
mod secure_memory;

pub const APP_NAME: &str = "ypw";

pub use cipher::{Cipher, CryptoError};
pub use format::{ChunkReader, FileHeader, FormatError};
pub use key::{Argon2id, KdfParams, Key, KeyDerivation};
pub use partdec::PartDec;
pub use password_record::{PasswordField, PasswordRecord};
pub use pwgen::{CharacterPools, GeneratorError, PasswordGenerator, RandomSource, RngEngine};
pub use record::{FixedLayout, Record, RecordError};
pub use secure_buffer::{BufferError, SecureBuffer};
