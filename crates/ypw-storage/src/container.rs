use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};
use ypw_core::format::{
    ChunkReader, FileHeader, FormatError, IDENTIFIER, IDENTIFIER_LEN, check_identifier,
    open_header, seal_header,
};
use ypw_core::{BufferError, CryptoError, Key, PartDec, SecureBuffer};

use crate::chunk::{ChunkStorage, WritePolicy, write_chunk_retrying};
use crate::{create_backup, insecure_mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RetryReason {
    #[error("file was modified by someone else since it was last written")]
    ExternallyModified,
    #[error("chunk write was cut short ({0})")]
    PartialWrite(io::ErrorKind),
}

impl RetryReason {
    #[must_use]
    pub fn io_kind(self) -> io::ErrorKind {
        match self {
            Self::ExternallyModified => io::ErrorKind::Other,
            Self::PartialWrite(kind) => kind,
        }
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("not a valid container file: {0}")]
    FileFormat(FormatError),
    #[error("invalid password")]
    InvalidPassword,
    #[error("record could not be decrypted: {0}")]
    Decryption(CryptoError),
    #[error(transparent)]
    Crypto(CryptoError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("{0}; retry with a forced write")]
    Retryable(RetryReason),
    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error("{} is accessible by other users (mode {mode:o})", .path.display())]
    InsecurePermissions { path: PathBuf, mode: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ContainerError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

impl From<FormatError> for ContainerError {
    fn from(error: FormatError) -> Self {
        match error {
            FormatError::InvalidPassword => Self::InvalidPassword,
            FormatError::Io(error) => Self::Io(error),
            FormatError::Buffer(error) => Self::Buffer(error),
            FormatError::Crypto(error) => Self::Crypto(error),
            other => Self::FileFormat(other),
        }
    }
}

impl From<CryptoError> for ContainerError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::Buffer(error) => Self::Buffer(error),
            other => Self::Crypto(other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Refuse to open a file that group or other users can access.
    pub check_permissions: bool,
    /// Copy the file aside before every rewrite, keeping this many copies.
    pub backups: Option<usize>,
}

/// An open container file.
///
/// The handle stays open for the lifetime of the value. Every rewrite goes
/// through the same handle: truncate, identifier, header chunk, record
/// chunks. Nothing here locks the file against other processes; the
/// modification time seen after our last write is kept so that external
/// changes can be detected.
#[derive(Debug)]
pub struct Container {
    path: PathBuf,
    file: File,
    tracked_mtime: Option<SystemTime>,
    created: bool,
    options: ContainerOptions,
}

impl Container {
    pub fn open(path: impl AsRef<Path>, key: &Key, create: bool) -> Result<Self, ContainerError> {
        Self::open_with(path, key, create, ContainerOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        key: &Key,
        create: bool,
        options: ContainerOptions,
    ) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        if create {
            Self::create_new(path, key, options)
        } else {
            Self::open_existing(path, key, options)
        }
    }

    fn create_new(
        path: PathBuf,
        key: &Key,
        options: ContainerOptions,
    ) -> Result<Self, ContainerError> {
        let mut open_options = OpenOptions::new();
        open_options.read(true).write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_options.mode(0o600);
        }
        let file = open_options.open(&path).map_err(|error| {
            if error.kind() == io::ErrorKind::AlreadyExists {
                ContainerError::AlreadyExists(path.clone())
            } else {
                ContainerError::Io(error)
            }
        })?;

        let tracked_mtime = file.modified()?;
        let mut container = Self {
            path,
            file,
            tracked_mtime,
            created: true,
            options,
        };
        let header = seal_header(key, &FileHeader::stamped_now())?;
        container.rewrite(&header, &[], WritePolicy::DEFAULT)?;
        info!(path = %container.path.display(), "created container");
        Ok(container)
    }

    fn open_existing(
        path: PathBuf,
        key: &Key,
        options: ContainerOptions,
    ) -> Result<Self, ContainerError> {
        if options.check_permissions
            && let Some(mode) = insecure_mode(&path)?
        {
            warn!(path = %path.display(), mode, "container permissions too open");
            return Err(ContainerError::InsecurePermissions { path, mode });
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let tracked_mtime = file.modified()?;
        let container = Self {
            path,
            file,
            tracked_mtime,
            created: false,
            options,
        };
        container.validate_key(key)?;
        debug!(path = %container.path.display(), "opened container");
        Ok(container)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this value created the file rather than opening an existing
    /// one.
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn validate_key(&self, key: &Key) -> Result<(), ContainerError> {
        self.header(key).map(|_| ())
    }

    pub fn header(&self, key: &Key) -> Result<FileHeader, ContainerError> {
        let (sealed, _) = self.chunks()?;
        Ok(open_header(key, &sealed)?)
    }

    pub fn password_set_at(&self, key: &Key) -> Result<SystemTime, ContainerError> {
        Ok(self.header(key)?.password_set_time())
    }

    pub fn read(&self, key: &Key) -> Result<Vec<PartDec>, ContainerError> {
        let (sealed, mut chunks) = self.chunks()?;
        open_header(key, &sealed)?;

        let mut records = Vec::new();
        while let Some(chunk) = chunks.next_chunk("record chunk")? {
            records.push(PartDec::from_ciphertext(chunk, key).map_err(|error| match error {
                CryptoError::Malformed { .. } | CryptoError::RecordSize { .. } => {
                    ContainerError::FileFormat(FormatError::Malformed("record chunk"))
                }
                CryptoError::Buffer(error) => ContainerError::Buffer(error),
                other => ContainerError::Decryption(other),
            })?);
        }
        debug!(path = %self.path.display(), records = records.len(), "read container");
        Ok(records)
    }

    pub fn save(&mut self, records: &[PartDec]) -> Result<(), ContainerError> {
        self.save_with(records, WritePolicy::DEFAULT)
    }

    /// Rewrites the file with `records`, carrying the sealed header over
    /// unchanged.
    pub fn save_with(
        &mut self,
        records: &[PartDec],
        policy: WritePolicy,
    ) -> Result<(), ContainerError> {
        self.ensure_unchanged(policy)?;
        let (header, _) = self.chunks()?;
        self.backup()?;
        self.rewrite(&header, records, policy)?;
        info!(path = %self.path.display(), records = records.len(), "saved container");
        Ok(())
    }

    /// Re-seals the header and every record under `new` and rewrites the
    /// file. The header gets a fresh password-set time. Returns the records
    /// as sealed under `new`.
    pub fn rotate_key(&mut self, old: &Key, new: &Key) -> Result<Vec<PartDec>, ContainerError> {
        self.rotate_key_with(old, new, WritePolicy::DEFAULT)
    }

    /// [`rotate_key`](Self::rotate_key) under an explicit write policy;
    /// `force_write` rotates over an external modification.
    pub fn rotate_key_with(
        &mut self,
        old: &Key,
        new: &Key,
        policy: WritePolicy,
    ) -> Result<Vec<PartDec>, ContainerError> {
        self.validate_key(old)?;
        self.ensure_unchanged(policy)?;

        let mut resealed = Vec::new();
        for record in self.read(old)? {
            let plaintext = record
                .decrypt_full(old)
                .map_err(ContainerError::Decryption)?;
            resealed.push(PartDec::from_plaintext(&plaintext, new)?);
        }

        let header = seal_header(new, &FileHeader::stamped_now())?;
        self.backup()?;
        self.rewrite(&header, &resealed, policy)?;
        info!(path = %self.path.display(), records = resealed.len(), "rotated container key");
        Ok(resealed)
    }

    /// Whether the file's modification time moved since our last write.
    pub fn is_modified_externally(&self) -> Result<bool, ContainerError> {
        Ok(self.file.modified()? != self.tracked_mtime)
    }

    fn ensure_unchanged(&self, policy: WritePolicy) -> Result<(), ContainerError> {
        if !policy.force_write && self.is_modified_externally()? {
            warn!(path = %self.path.display(), "refusing to save over an externally modified container");
            return Err(ContainerError::Retryable(RetryReason::ExternallyModified));
        }
        Ok(())
    }

    fn backup(&self) -> Result<(), ContainerError> {
        if let Some(max_retained) = self.options.backups {
            let backup = create_backup(&self.path, max_retained)?;
            info!(target: "audit", event = "backup_created", path = %backup.display());
        }
        Ok(())
    }

    /// Positions a reader after the identifier and pulls the header chunk.
    fn chunks(&self) -> Result<(SecureBuffer, ChunkReader<BufReader<&File>>), ContainerError> {
        let len = self.file.metadata()?.len();
        let mut handle = &self.file;
        handle.seek(SeekFrom::Start(0))?;

        let mut reader = BufReader::new(handle);
        let mut leading = Vec::with_capacity(IDENTIFIER_LEN);
        (&mut reader)
            .take(IDENTIFIER_LEN as u64)
            .read_to_end(&mut leading)?;
        check_identifier(&leading)?;

        let mut chunks = ChunkReader::new(reader, len - IDENTIFIER_LEN as u64);
        let header = chunks
            .next_chunk("header chunk")?
            .ok_or(FormatError::Truncated("header chunk"))?;
        Ok((header, chunks))
    }

    fn rewrite(
        &mut self,
        header: &[u8],
        records: &[PartDec],
        policy: WritePolicy,
    ) -> Result<(), ContainerError> {
        self.file.truncate_to(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(IDENTIFIER)?;
        self.tracked_mtime = self.file.modified()?;

        write_chunk_retrying(&mut self.file, header, policy, &mut self.tracked_mtime)?;
        for record in records {
            write_chunk_retrying(
                &mut self.file,
                record.ciphertext(),
                policy,
                &mut self.tracked_mtime,
            )?;
        }

        self.file.sync_all()?;
        self.tracked_mtime = self.file.modified()?;
        debug!(
            path = %self.path.display(),
            bytes = self.file.metadata()?.len(),
            chunks = records.len() + 1,
            "rewrote container"
        );
        Ok(())
    }
}
