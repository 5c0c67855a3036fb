use std::fmt;
use std::marker::PhantomData;

use thiserror::Error;

use crate::secure_buffer::{BufferError, SecureBuffer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record image is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// A value with a fixed-width byte image.
///
/// `encode` receives a slice of exactly `SIZE` bytes and must fill all of
/// it; `decode` receives a slice of exactly `SIZE` bytes.
pub trait FixedLayout: Sized {
    const SIZE: usize;

    fn encode(&self, out: &mut [u8]);

    fn decode(bytes: &[u8]) -> Self;
}

/// A fixed-layout value whose byte image lives in a [`SecureBuffer`].
pub struct Record<T: FixedLayout> {
    image: SecureBuffer,
    layout: PhantomData<fn() -> T>,
}

impl<T: FixedLayout> Record<T> {
    pub fn new(value: &T) -> Result<Self, RecordError> {
        let mut record = Self::zeroed()?;
        value.encode(record.image.as_mut_slice());
        Ok(record)
    }

    pub fn zeroed() -> Result<Self, RecordError> {
        let size = u32::try_from(T::SIZE).map_err(|_| BufferError::TooLarge(T::SIZE))?;
        Ok(Self {
            image: SecureBuffer::allocate(size)?,
            layout: PhantomData,
        })
    }

    /// Adopts a decrypted image. Any width other than `T::SIZE` is rejected.
    pub fn from_buffer(image: SecureBuffer) -> Result<Self, RecordError> {
        if image.len() != T::SIZE {
            return Err(RecordError::SizeMismatch {
                expected: T::SIZE,
                actual: image.len(),
            });
        }
        Ok(Self {
            image,
            layout: PhantomData,
        })
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        T::SIZE
    }

    #[must_use]
    pub fn value(&self) -> T {
        T::decode(self.image.as_slice())
    }

    pub fn set(&mut self, value: &T) {
        value.encode(self.image.as_mut_slice());
    }

    /// Edits the value in place and writes the result back to the image.
    pub fn update<R>(&mut self, edit: impl FnOnce(&mut T) -> R) -> R {
        let mut value = self.value();
        let outcome = edit(&mut value);
        value.encode(self.image.as_mut_slice());
        outcome
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_slice()
    }

    #[must_use]
    pub fn as_buffer(&self) -> &SecureBuffer {
        &self.image
    }

    #[must_use]
    pub fn into_buffer(self) -> SecureBuffer {
        self.image
    }
}

impl<T: FixedLayout> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            layout: PhantomData,
        }
    }
}

impl<T: FixedLayout> PartialEq for Record<T> {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
    }
}

impl<T: FixedLayout> Eq for Record<T> {}

impl<T: FixedLayout> fmt::Debug for Record<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("type", &std::any::type_name::<T>())
            .field("size", &T::SIZE)
            .finish_non_exhaustive()
    }
}
