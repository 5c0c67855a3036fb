use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use crate::cipher::{Cipher, CryptoError};
use crate::key::Key;
use crate::password_record::{PasswordField, PasswordRecord};
use crate::record::Record;
use crate::secure_buffer::SecureBuffer;

/// A sealed password record plus its name in the clear.
///
/// The name is only ever taken from the plaintext the ciphertext was made
/// from or opens to, so the two cannot drift apart. Everything else stays
/// sealed until [`PartDec::decrypt_full`].
#[derive(Clone)]
pub struct PartDec {
    ciphertext: SecureBuffer,
    name: SecureBuffer,
}

impl PartDec {
    pub fn from_plaintext(record: &Record<PasswordRecord>, key: &Key) -> Result<Self, CryptoError> {
        let ciphertext = Cipher::new(key).encrypt_record(record)?;
        let name = cached_name(record)?;
        Ok(Self { ciphertext, name })
    }

    /// Adopts a chunk read from disk. The record is opened once to pick up
    /// the name and wiped straight away.
    pub fn from_ciphertext(ciphertext: SecureBuffer, key: &Key) -> Result<Self, CryptoError> {
        let plaintext = Cipher::new(key).decrypt_record::<PasswordRecord>(&ciphertext)?;
        let name = cached_name(&plaintext)?;
        Ok(Self { ciphertext, name })
    }

    pub fn decrypt_full(&self, key: &Key) -> Result<Record<PasswordRecord>, CryptoError> {
        Cipher::new(key).decrypt_record(&self.ciphertext)
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        self.name.as_slice()
    }

    #[must_use]
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name())
    }

    #[must_use]
    pub fn ciphertext(&self) -> &SecureBuffer {
        &self.ciphertext
    }
}

fn cached_name(record: &Record<PasswordRecord>) -> Result<SecureBuffer, CryptoError> {
    let name = PasswordField::Name
        .read_from(record.as_bytes())
        .unwrap_or_default();
    Ok(SecureBuffer::from_slice(name)?)
}

// Ordering and equality look at the name only; it is what listings sort
// and search on.
impl PartialEq for PartDec {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for PartDec {}

impl PartialOrd for PartDec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PartDec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name().cmp(other.name())
    }
}

impl fmt::Debug for PartDec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartDec")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::PartDec;
    use crate::cipher::CryptoError;
    use crate::key::tests::test_key;
    use crate::password_record::{NAME_SIZE, PasswordRecord};
    use crate::record::Record;

    fn entry(name: &[u8], password: &[u8]) -> Record<PasswordRecord> {
        Record::new(&PasswordRecord::with_fields(name, b"host", b"user", password, b""))
            .expect("record")
    }

    #[test]
    fn plaintext_construction_caches_name() {
        let key = test_key(b"hunter2");
        let record = entry(b"site", b"abc");
        let part = PartDec::from_plaintext(&record, &key).expect("encrypt");

        assert_eq!(part.name(), b"site");
        assert_eq!(part.name_lossy(), "site");
        assert_eq!(part.decrypt_full(&key).expect("decrypt"), record);
    }

    #[test]
    fn ciphertext_construction_rederives_name() {
        let key = test_key(b"hunter2");
        let sealed = PartDec::from_plaintext(&entry(b"mail", b"pw"), &key)
            .expect("encrypt")
            .ciphertext()
            .clone();

        let loaded = PartDec::from_ciphertext(sealed, &key).expect("load");
        assert_eq!(loaded.name(), b"mail");
        assert_eq!(loaded.decrypt_full(&key).expect("decrypt").value().password(), b"pw");
    }

    #[test]
    fn full_length_name_is_kept_whole() {
        let key = test_key(b"hunter2");
        let part = PartDec::from_plaintext(&entry(&[b'n'; NAME_SIZE + 9], b""), &key)
            .expect("encrypt");
        assert_eq!(part.name().len(), NAME_SIZE);
    }

    #[test]
    fn foreign_key_fails_to_load() {
        let key = test_key(b"hunter2");
        let sealed = PartDec::from_plaintext(&entry(b"site", b"abc"), &key)
            .expect("encrypt")
            .ciphertext()
            .clone();
        assert_eq!(
            PartDec::from_ciphertext(sealed, &test_key(b"wrong")).map(|_| ()),
            Err(CryptoError::Authentication)
        );
    }

    #[test]
    fn ordering_is_by_raw_name_bytes() {
        let key = test_key(b"hunter2");
        let mut parts: Vec<PartDec> = [&b"beta"[..], &b"Alpha"[..], &b"alpha"[..]]
            .into_iter()
            .map(|name| PartDec::from_plaintext(&entry(name, b""), &key).expect("encrypt"))
            .collect();
        parts.sort();

        let names: Vec<&[u8]> = parts.iter().map(PartDec::name).collect();
        assert_eq!(names, vec![&b"Alpha"[..], &b"alpha"[..], &b"beta"[..]]);
    }
}
