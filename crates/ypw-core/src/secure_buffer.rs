use std::fmt;
use std::ops::{Add, Deref, DerefMut};

use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroize;

#[cfg(test)]
use std::cell::RefCell;

#[cfg(test)]
thread_local! {
    static RELEASED_REGIONS: RefCell<Vec<ReleasedRegion>> = const { RefCell::new(Vec::new()) };
}

#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReleasedRegion {
    pub(crate) len: usize,
    pub(crate) all_zero: bool,
}

#[cfg(test)]
pub(crate) fn take_released_regions() -> Vec<ReleasedRegion> {
    RELEASED_REGIONS.with(|regions| std::mem::take(&mut *regions.borrow_mut()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("memory exhausted while allocating {requested} bytes")]
    OutOfMemory { requested: usize },
    #[error("position {index} out of range for a buffer of {len} bytes")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("buffer of {0} bytes exceeds the 32-bit size limit")]
    TooLarge(usize),
}

/// Heap buffer for secret bytes.
///
/// The backing region is overwritten with zeros before it is handed back to
/// the allocator, on every path: drop, `resize`, `assign_from`, `clear`.
/// An empty buffer owns no allocation at all.
pub struct SecureBuffer {
    data: Box<[u8]>,
}

impl SecureBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Box::default(),
        }
    }

    /// Allocates `size` bytes. The content is unspecified from the caller's
    /// point of view and must be initialised before use.
    pub fn allocate(size: u32) -> Result<Self, BufferError> {
        Ok(Self {
            data: allocate_region(size_to_usize(size))?,
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BufferError> {
        check_size(bytes.len())?;
        let mut data = allocate_region(bytes.len())?;
        data.copy_from_slice(bytes);
        Ok(Self { data })
    }

    /// Copies `bytes` into a fresh region and wipes the vector, spare
    /// capacity included.
    pub fn from_vec(mut bytes: Vec<u8>) -> Result<Self, BufferError> {
        let buffer = Self::from_slice(&bytes);
        bytes.zeroize();
        buffer
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        // Every constructor enforces the 32-bit limit.
        u32::try_from(self.data.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn get(&self, index: usize) -> Result<&u8, BufferError> {
        let len = self.data.len();
        self.data
            .get(index)
            .ok_or(BufferError::IndexOutOfRange { index, len })
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut u8, BufferError> {
        let len = self.data.len();
        self.data
            .get_mut(index)
            .ok_or(BufferError::IndexOutOfRange { index, len })
    }

    /// Moves the content into a new region of `new_size` bytes. The old
    /// region is never grown in place; it is wiped and released once the
    /// copy is done. On allocation failure the buffer is left untouched.
    pub fn resize(&mut self, new_size: u32) -> Result<(), BufferError> {
        let new_len = size_to_usize(new_size);
        let mut fresh = allocate_region(new_len)?;
        let kept = new_len.min(self.data.len());
        fresh[..kept].copy_from_slice(&self.data[..kept]);
        release(std::mem::replace(&mut self.data, fresh));
        Ok(())
    }

    /// Replaces this buffer's content with an independent copy of `source`.
    pub fn assign_from(&mut self, source: &SecureBuffer) -> Result<(), BufferError> {
        if std::ptr::eq(self, source) {
            return Ok(());
        }
        let mut fresh = allocate_region(source.len())?;
        fresh.copy_from_slice(&source.data);
        release(std::mem::replace(&mut self.data, fresh));
        Ok(())
    }

    /// Moves the content out, leaving this buffer empty.
    #[must_use]
    pub fn take(&mut self) -> SecureBuffer {
        SecureBuffer {
            data: std::mem::take(&mut self.data),
        }
    }

    pub fn concat(&self, other: &SecureBuffer) -> Result<SecureBuffer, BufferError> {
        let total = self
            .len()
            .checked_add(other.len())
            .ok_or(BufferError::TooLarge(usize::MAX))?;
        check_size(total)?;
        let mut data = allocate_region(total)?;
        data[..self.len()].copy_from_slice(&self.data);
        data[self.len()..].copy_from_slice(&other.data);
        Ok(SecureBuffer { data })
    }

    pub fn clear(&mut self) {
        release(std::mem::take(&mut self.data));
    }
}

impl Default for SecureBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SecureBuffer {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.data));
    }
}

impl Clone for SecureBuffer {
    fn clone(&self) -> Self {
        Self {
            data: Box::from(&self.data[..]),
        }
    }
}

impl PartialEq for SecureBuffer {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.data[..].ct_eq(&other.data[..]))
    }
}

impl Eq for SecureBuffer {}

impl Add for &SecureBuffer {
    type Output = Result<SecureBuffer, BufferError>;

    fn add(self, rhs: &SecureBuffer) -> Self::Output {
        self.concat(rhs)
    }
}

impl Deref for SecureBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for SecureBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl AsRef<[u8]> for SecureBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for SecureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureBuffer")
            .field("len", &self.data.len())
            .finish_non_exhaustive()
    }
}

fn size_to_usize(size: u32) -> usize {
    usize::try_from(size).unwrap_or(usize::MAX)
}

fn check_size(len: usize) -> Result<(), BufferError> {
    if u32::try_from(len).is_err() {
        return Err(BufferError::TooLarge(len));
    }
    Ok(())
}

fn allocate_region(len: usize) -> Result<Box<[u8]>, BufferError> {
    if len == 0 {
        return Ok(Box::default());
    }

    let mut region = Vec::new();
    region
        .try_reserve_exact(len)
        .map_err(|_| BufferError::OutOfMemory { requested: len })?;
    region.resize(len, 0);
    Ok(region.into_boxed_slice())
}

fn release(mut region: Box<[u8]>) {
    if region.is_empty() {
        return;
    }
    region.as_mut().zeroize();

    #[cfg(test)]
    RELEASED_REGIONS.with(|regions| {
        regions.borrow_mut().push(ReleasedRegion {
            len: region.len(),
            all_zero: region.iter().all(|byte| *byte == 0),
        });
    });
}
