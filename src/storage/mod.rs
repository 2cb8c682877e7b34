pub mod account;
pub mod certificates;

use std::{
    fs::{self, DirBuilder, OpenOptions},
    io::{ErrorKind, Write},
    path::Path,
};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};

use log::warn;

use crate::error::StorageError;

/// Creates `path` (and parents) owner-only; an existing directory is fine.
pub(crate) fn create_private_dir(path: &Path) -> Result<(), StorageError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).map_err(|source| StorageError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes `content` with 0600 permissions, truncating unless `create_new`.
pub(crate) fn write_secure_file(path: &Path, content: &[u8], create_new: bool) -> Result<(), StorageError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }
    #[cfg(unix)]
    options.mode(0o600);

    let write_err = |source: std::io::Error| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = options.open(path).map_err(|source| {
        if source.kind() == ErrorKind::AlreadyExists {
            StorageError::AlreadyExists(path.to_path_buf())
        } else {
            write_err(source)
        }
    })?;
    file.write_all(content).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    tighten_permissions(path);
    Ok(())
}

/// `mode` only applies on creation; files left by older runs are narrowed here.
fn tighten_permissions(path: &Path) {
    #[cfg(unix)]
    {
        match fs::metadata(path) {
            Ok(metadata) if metadata.permissions().mode() & 0o777 != 0o600 => {
                if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
                    warn!("[store] unable to restrict permissions on {}: {err}", path.display());
                }
            }
            Ok(_) => {}
            Err(err) => warn!("[store] unable to check permissions on {}: {err}", path.display()),
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>, StorageError> {
    fs::read(path).map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            StorageError::NotFound(path.to_path_buf())
        } else {
            StorageError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Like [`read_file`] but a missing file is `None`.
pub(crate) fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match read_file(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("acme-lego-fs-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    #[cfg(unix)]
    fn secure_files_and_dirs_are_owner_only() {
        let root = temp_dir();
        let dir = root.join("a/b");
        create_private_dir(&dir).unwrap();
        create_private_dir(&dir).unwrap();
        assert_eq!(fs::metadata(&dir).unwrap().permissions().mode() & 0o777, 0o700);

        let file = dir.join("secret.key");
        fs::write(&file, b"old").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();
        write_secure_file(&file, b"new", false).unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"new");
        assert_eq!(fs::metadata(&file).unwrap().permissions().mode() & 0o777, 0o600);

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn create_new_refuses_existing() {
        let root = temp_dir();
        create_private_dir(&root).unwrap();
        let file = root.join("account.key");
        write_secure_file(&file, b"one", true).unwrap();
        let err = write_secure_file(&file, b"two", true).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert_eq!(fs::read(&file).unwrap(), b"one");
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn missing_reads() {
        let path = temp_dir().join("nothing");
        assert!(matches!(read_file(&path), Err(StorageError::NotFound(_))));
        assert!(read_optional(&path).unwrap().is_none());
    }
}
