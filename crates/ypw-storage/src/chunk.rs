use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};
use std::time::SystemTime;

use tracing::{debug, warn};
use ypw_core::format::encode_length;

use crate::container::{ContainerError, RetryReason};

/// Controls for a single chunk write.
///
/// `force_write` skips the check that the file was not modified behind our
/// back since the last write. `force_append` starts the chunk at the end of
/// the file instead of the current position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WritePolicy {
    pub force_append: bool,
    pub force_write: bool,
}

impl WritePolicy {
    pub const DEFAULT: Self = Self {
        force_append: false,
        force_write: false,
    };

    pub const FORCED: Self = Self {
        force_append: true,
        force_write: true,
    };
}

/// Seekable byte sink a container is written to.
pub trait ChunkStorage: Write + Seek {
    /// Current modification time, `None` where the platform has none.
    fn modified(&self) -> io::Result<Option<SystemTime>>;

    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl ChunkStorage for File {
    fn modified(&self) -> io::Result<Option<SystemTime>> {
        match self.metadata()?.modified() {
            Ok(time) => Ok(Some(time)),
            Err(error) if error.kind() == io::ErrorKind::Unsupported => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes one `[length][payload]` chunk.
///
/// A failed write never leaves a partial chunk behind: the storage is cut
/// back to where the chunk started and a retryable error is returned.
/// `tracked` is the modification time seen after the last write and is
/// refreshed on success.
pub fn write_chunk<S: ChunkStorage + ?Sized>(
    storage: &mut S,
    payload: &[u8],
    policy: WritePolicy,
    tracked: &mut Option<SystemTime>,
) -> Result<(), ContainerError> {
    if !policy.force_write && storage.modified()? != *tracked {
        warn!("container changed on disk since the last write");
        return Err(ContainerError::Retryable(RetryReason::ExternallyModified));
    }

    let start = if policy.force_append {
        storage.seek(SeekFrom::End(0))?
    } else {
        storage.stream_position()?
    };
    let prefix = encode_length(payload.len())?;

    let written = storage
        .write_all(&prefix)
        .and_then(|()| storage.write_all(payload));
    if let Err(error) = written {
        debug!(offset = start, %error, "chunk write failed; cutting back partial chunk");
        storage.truncate_to(start)?;
        storage.seek(SeekFrom::Start(start))?;
        *tracked = storage.modified()?;
        return Err(ContainerError::Retryable(RetryReason::PartialWrite(
            error.kind(),
        )));
    }

    *tracked = storage.modified()?;
    Ok(())
}

/// [`write_chunk`] with one forced retry. A second failure is fatal.
pub fn write_chunk_retrying<S: ChunkStorage + ?Sized>(
    storage: &mut S,
    payload: &[u8],
    policy: WritePolicy,
    tracked: &mut Option<SystemTime>,
) -> Result<(), ContainerError> {
    match write_chunk(storage, payload, policy, tracked) {
        Err(ContainerError::Retryable(reason)) => {
            warn!(%reason, "retrying chunk write with forced append");
            write_chunk(storage, payload, WritePolicy::FORCED, tracked).map_err(|error| {
                match error {
                    ContainerError::Retryable(reason) => ContainerError::Io(io::Error::new(
                        reason.io_kind(),
                        format!("chunk write failed after a forced retry: {reason}"),
                    )),
                    other => other,
                }
            })
        }
        other => other,
    }
}
