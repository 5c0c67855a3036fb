use std::fmt;
use std::ops::Range;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::record::FixedLayout;

pub const NAME_SIZE: usize = 128;
pub const HOST_SIZE: usize = 256;
pub const USERNAME_SIZE: usize = 256;
pub const PASSWORD_SIZE: usize = 256;
pub const COMMENT_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PasswordField {
    Name,
    Host,
    Username,
    Password,
    Comment,
}

impl PasswordField {
    pub const ALL: [Self; 5] = [
        Self::Name,
        Self::Host,
        Self::Username,
        Self::Password,
        Self::Comment,
    ];

    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Name => NAME_SIZE,
            Self::Host => HOST_SIZE,
            Self::Username => USERNAME_SIZE,
            Self::Password => PASSWORD_SIZE,
            Self::Comment => COMMENT_SIZE,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Host => "host",
            Self::Username => "username",
            Self::Password => "password",
            Self::Comment => "comment",
        }
    }

    /// Byte range of this field inside a record image.
    #[must_use]
    pub const fn range(self) -> Range<usize> {
        let start = match self {
            Self::Name => 0,
            Self::Host => NAME_SIZE,
            Self::Username => NAME_SIZE + HOST_SIZE,
            Self::Password => NAME_SIZE + HOST_SIZE + USERNAME_SIZE,
            Self::Comment => NAME_SIZE + HOST_SIZE + USERNAME_SIZE + PASSWORD_SIZE,
        };
        start..start + self.width()
    }

    /// Reads this field straight out of a record image, up to the first NUL.
    /// Returns `None` when the image is too short to hold the field.
    #[must_use]
    pub fn read_from(self, image: &[u8]) -> Option<&[u8]> {
        image.get(self.range()).map(until_nul)
    }
}

/// One credential entry. Every field is a NUL-padded byte array; values
/// longer than the field width are truncated and may then lack a trailing
/// NUL.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PasswordRecord {
    name: [u8; NAME_SIZE],
    host: [u8; HOST_SIZE],
    username: [u8; USERNAME_SIZE],
    password: [u8; PASSWORD_SIZE],
    comment: [u8; COMMENT_SIZE],
}

impl PasswordRecord {
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: [0; NAME_SIZE],
            host: [0; HOST_SIZE],
            username: [0; USERNAME_SIZE],
            password: [0; PASSWORD_SIZE],
            comment: [0; COMMENT_SIZE],
        }
    }

    #[must_use]
    pub fn with_fields(
        name: &[u8],
        host: &[u8],
        username: &[u8],
        password: &[u8],
        comment: &[u8],
    ) -> Self {
        let mut record = Self::new();
        record.set(PasswordField::Name, name);
        record.set(PasswordField::Host, host);
        record.set(PasswordField::Username, username);
        record.set(PasswordField::Password, password);
        record.set(PasswordField::Comment, comment);
        record
    }

    #[must_use]
    pub fn get(&self, field: PasswordField) -> &[u8] {
        until_nul(self.slot(field))
    }

    /// Stores `value` with `strncpy` semantics: at most `field.width()` bytes
    /// are kept and the remainder of the field is zero-filled.
    pub fn set(&mut self, field: PasswordField, value: &[u8]) {
        let slot = self.slot_mut(field);
        let kept = value.len().min(slot.len());
        slot[..kept].copy_from_slice(&value[..kept]);
        slot[kept..].fill(0);
    }

    #[must_use]
    pub fn name(&self) -> &[u8] {
        self.get(PasswordField::Name)
    }

    #[must_use]
    pub fn host(&self) -> &[u8] {
        self.get(PasswordField::Host)
    }

    #[must_use]
    pub fn username(&self) -> &[u8] {
        self.get(PasswordField::Username)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.get(PasswordField::Password)
    }

    #[must_use]
    pub fn comment(&self) -> &[u8] {
        self.get(PasswordField::Comment)
    }

    fn slot(&self, field: PasswordField) -> &[u8] {
        match field {
            PasswordField::Name => &self.name,
            PasswordField::Host => &self.host,
            PasswordField::Username => &self.username,
            PasswordField::Password => &self.password,
            PasswordField::Comment => &self.comment,
        }
    }

    fn slot_mut(&mut self, field: PasswordField) -> &mut [u8] {
        match field {
            PasswordField::Name => &mut self.name,
            PasswordField::Host => &mut self.host,
            PasswordField::Username => &mut self.username,
            PasswordField::Password => &mut self.password,
            PasswordField::Comment => &mut self.comment,
        }
    }
}

impl Default for PasswordRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PasswordRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordRecord")
            .field("name", &String::from_utf8_lossy(self.name()))
            .finish_non_exhaustive()
    }
}

impl FixedLayout for PasswordRecord {
    const SIZE: usize = NAME_SIZE + HOST_SIZE + USERNAME_SIZE + PASSWORD_SIZE + COMMENT_SIZE;

    fn encode(&self, out: &mut [u8]) {
        for field in PasswordField::ALL {
            out[field.range()].copy_from_slice(self.slot(field));
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut record = Self::new();
        for field in PasswordField::ALL {
            record.slot_mut(field).copy_from_slice(&bytes[field.range()]);
        }
        record
    }
}

fn until_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    &bytes[..end]
}
