use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

pub mod chunk;
pub mod container;

pub use chunk::{ChunkStorage, WritePolicy, write_chunk, write_chunk_retrying};
pub use container::{Container, ContainerError, ContainerOptions, RetryReason};

const BACKUP_PREFIX: &str = "backup-";
const BACKUP_SUFFIX: &str = ".ypw";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("container locked by another process")]
    Locked,
    #[error("no backups found for {}", .0.display())]
    NoBackups(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub path: PathBuf,
    pub timestamp: u64,
}

/// Advisory lock on a container, held through a sibling `.<name>.lock` file
/// until dropped.
#[derive(Debug)]
pub struct ContainerLock {
    container_path: PathBuf,
    _lock_file: File,
}

impl ContainerLock {
    pub fn path(&self) -> &Path {
        &self.container_path
    }
}

pub fn acquire_container_lock(path: &Path) -> Result<ContainerLock, StorageError> {
    let lock_path = lock_file_path(path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    match lock_file.try_lock_exclusive() {
        Ok(()) => {
            debug!(lock = %lock_path.display(), "acquired container lock");
            Ok(ContainerLock {
                container_path: path.to_path_buf(),
                _lock_file: lock_file,
            })
        }
        Err(error) if error.kind() == io::ErrorKind::WouldBlock => Err(StorageError::Locked),
        Err(error) => Err(StorageError::Io(error)),
    }
}

#[must_use]
pub fn lock_file_path(path: &Path) -> PathBuf {
    sibling(path, |name| format!(".{name}.lock"))
}

#[must_use]
pub fn backup_directory(path: &Path) -> PathBuf {
    sibling(path, |name| format!("{name}.backups"))
}

/// Copies the container to `<file>.backups/backup-<millis>.ypw` and drops
/// all but the newest `max_retained` copies.
pub fn create_backup(path: &Path, max_retained: usize) -> io::Result<PathBuf> {
    let backup_dir = backup_directory(path);
    fs::create_dir_all(&backup_dir)?;
    // Keep names strictly increasing even when saves land in the same
    // millisecond.
    let after_newest = scan_backups(&backup_dir)?
        .first()
        .map_or(0, |newest| newest.timestamp + 1);
    let backup_path = backup_path_for(&backup_dir, unix_millis_now().max(after_newest));

    fs::copy(path, &backup_path)?;
    set_secure_permissions(&backup_path)?;
    prune_backups(&backup_dir, max_retained)?;
    Ok(backup_path)
}

/// Backups of `path`, newest first.
pub fn list_backups(path: &Path) -> Result<Vec<BackupEntry>, StorageError> {
    let backup_dir = backup_directory(path);
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    Ok(scan_backups(&backup_dir)?)
}

/// Replaces the container with its newest backup. The file being replaced is
/// kept next to it as `<file>.corrupt`; its new path is returned.
pub fn recover_latest(lock: &ContainerLock) -> Result<Option<PathBuf>, StorageError> {
    let path = lock.path();
    let newest = list_backups(path)?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::NoBackups(path.to_path_buf()))?;
    recover_from_backup(lock, &newest.path)
}

pub fn recover_from_backup(
    lock: &ContainerLock,
    backup_path: &Path,
) -> Result<Option<PathBuf>, StorageError> {
    let container_path = lock.path();
    let backup_bytes = fs::read(backup_path)?;
    let corrupt_path = preserve_corrupt(container_path)?;
    write_atomic(container_path, &backup_bytes)?;
    info!(
        path = %container_path.display(),
        backup = %backup_path.display(),
        "restored container from backup"
    );
    Ok(corrupt_path)
}

/// The permission bits of `path` when group or other users have any access
/// to it, `None` otherwise. Always `None` off Unix.
pub fn insecure_mode(path: &Path) -> io::Result<Option<u32>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(path)?.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Ok(Some(mode));
        }
    }
    #[cfg(not(unix))]
    let _ = path;

    Ok(None)
}

pub fn set_secure_permissions(_path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(_path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

fn sibling(path: &Path, name: impl FnOnce(&str) -> String) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("container");
    path.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(name(file_name))
}

fn backup_path_for(backup_dir: &Path, timestamp: u64) -> PathBuf {
    backup_dir.join(format!("{BACKUP_PREFIX}{timestamp}{BACKUP_SUFFIX}"))
}

fn scan_backups(backup_dir: &Path) -> io::Result<Vec<BackupEntry>> {
    let mut backups = Vec::new();
    for entry in fs::read_dir(backup_dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(timestamp) = parse_backup_timestamp(&path) {
            backups.push(BackupEntry { path, timestamp });
        }
    }
    backups.sort_by(|left, right| right.timestamp.cmp(&left.timestamp));
    Ok(backups)
}

fn prune_backups(backup_dir: &Path, max_retained: usize) -> io::Result<()> {
    for stale in scan_backups(backup_dir)?.into_iter().skip(max_retained) {
        debug!(backup = %stale.path.display(), "pruning old backup");
        fs::remove_file(stale.path)?;
    }
    Ok(())
}

fn parse_backup_timestamp(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_SUFFIX)?
        .parse()
        .ok()
}

fn preserve_corrupt(container_path: &Path) -> io::Result<Option<PathBuf>> {
    if !container_path.exists() {
        return Ok(None);
    }

    let mut corrupt_path = sibling(container_path, |name| format!("{name}.corrupt"));
    if corrupt_path.exists() {
        let stamp = unix_millis_now();
        corrupt_path = sibling(container_path, |name| format!("{name}.corrupt-{stamp}"));
    }
    fs::rename(container_path, &corrupt_path)?;
    Ok(Some(corrupt_path))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_file = sibling(path, |name| {
        format!(".{name}.{}.{}.tmp", std::process::id(), unix_millis_now())
    });

    let mut handle = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_file)?;
    set_secure_permissions(&temp_file)?;
    handle.write_all(bytes)?;
    handle.sync_all()?;
    drop(handle);

    fs::rename(&temp_file, path)?;

    if let Ok(directory_handle) = File::open(parent_dir) {
        let _ = directory_handle.sync_all();
    }
    Ok(())
}

fn unix_millis_now() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{
        StorageError, acquire_container_lock, backup_directory, create_backup, insecure_mode,
        list_backups, lock_file_path, recover_latest, set_secure_permissions,
    };

    fn temp_path(file_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ypw-storage-tests-{}-{file_name}",
            std::process::id()
        ))
    }

    #[test]
    fn lock_file_sits_next_to_container() {
        let path = PathBuf::from("/data/secrets.ypw");
        assert_eq!(lock_file_path(&path), PathBuf::from("/data/.secrets.ypw.lock"));
        assert_eq!(
            backup_directory(&path),
            PathBuf::from("/data/secrets.ypw.backups")
        );
    }

    #[test]
    fn second_lock_in_process_is_refused() {
        let path = temp_path("locked.ypw");
        let lock = acquire_container_lock(&path).expect("first lock");
        assert!(matches!(
            acquire_container_lock(&path),
            Err(StorageError::Locked)
        ));
        drop(lock);
        let relock = acquire_container_lock(&path).expect("lock after release");
        drop(relock);
        let _ = fs::remove_file(lock_file_path(&path));
    }

    #[test]
    fn backups_are_pruned_to_newest() {
        let path = temp_path("pruned.ypw");
        fs::write(&path, b"v1").expect("seed");
        let mut created = Vec::new();
        for round in 0..4 {
            fs::write(&path, format!("v{round}")).expect("rewrite");
            created.push(create_backup(&path, 2).expect("backup"));
        }

        let backups = list_backups(&path).expect("list");
        let kept: Vec<PathBuf> = backups.into_iter().map(|entry| entry.path).collect();
        assert_eq!(kept, vec![created[3].clone(), created[2].clone()]);
        assert_eq!(fs::read(&kept[0]).expect("read newest"), b"v3");

        let _ = fs::remove_dir_all(backup_directory(&path));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn recover_restores_newest_and_keeps_corrupt_copy() {
        let path = temp_path("recover.ypw");
        fs::write(&path, b"good").expect("seed");
        create_backup(&path, 5).expect("backup");
        fs::write(&path, b"broken").expect("corrupt");

        let lock = acquire_container_lock(&path).expect("lock");
        let corrupt = recover_latest(&lock)
            .expect("recover")
            .expect("corrupt copy kept");
        drop(lock);

        assert_eq!(fs::read(&path).expect("read restored"), b"good");
        assert_eq!(fs::read(&corrupt).expect("read corrupt"), b"broken");

        let _ = fs::remove_dir_all(backup_directory(&path));
        let _ = fs::remove_file(corrupt);
        let _ = fs::remove_file(lock_file_path(&path));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn recover_without_backups_fails() {
        let path = temp_path("no-backups.ypw");
        let lock = acquire_container_lock(&path).expect("lock");
        assert!(matches!(
            recover_latest(&lock),
            Err(StorageError::NoBackups(_))
        ));
        drop(lock);
        let _ = fs::remove_file(lock_file_path(&path));
    }

    #[cfg(unix)]
    #[test]
    fn permission_check_flags_group_access() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path("perms.ypw");
        fs::write(&path, b"x").expect("seed");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).expect("chmod");
        assert_eq!(insecure_mode(&path).expect("stat"), Some(0o640));

        set_secure_permissions(&path).expect("tighten");
        assert_eq!(insecure_mode(&path).expect("stat"), None);
        let _ = fs::remove_file(path);
    }
}
