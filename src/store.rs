use std::fs::{self, File};

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::{Builder, NamedTempFile, TempDir};

use crate::error::ConvertError;

/// Write a file through a temp file in the destination directory, then rename
/// it over `path`. A failure part way leaves any existing file untouched.
pub fn write_atomic<F>(path: &Utf8Path, write: F) -> Result<(), ConvertError>
where
    F: FnOnce(&mut File) -> Result<(), ConvertError>,
{
    let mut temp = temp_file_for(path)?;
    write(temp.as_file_mut())?;
    persist(temp, path)
}

/// Atomically replace `dest` with a copy of `source`.
pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), ConvertError> {
    let temp = temp_file_for(dest)?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| ConvertError::Filesystem(format!("copy {source}: {err}")))?;
    persist(temp, dest)
}

/// Scratch directory for staging files; removed when dropped.
pub fn staging_dir() -> Result<TempDir, ConvertError> {
    Builder::new()
        .prefix("kira-seurat")
        .tempdir()
        .map_err(|err| ConvertError::Filesystem(err.to_string()))
}

pub fn utf8_path(path: std::path::PathBuf) -> Result<Utf8PathBuf, ConvertError> {
    Utf8PathBuf::from_path_buf(path)
        .map_err(|path| ConvertError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

fn temp_file_for(path: &Utf8Path) -> Result<NamedTempFile, ConvertError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| ConvertError::Filesystem(err.to_string()))?;
    let mut builder = Builder::new();
    builder.prefix(".kira-seurat").suffix(".tmp");
    // Output is shared like any saveRDS file; the umask still applies.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o644));
    }
    builder
        .tempfile_in(parent.as_std_path())
        .map_err(|err| ConvertError::Filesystem(err.to_string()))
}

fn persist(temp: NamedTempFile, dest: &Utf8Path) -> Result<(), ConvertError> {
    temp.persist(dest.as_std_path())
        .map_err(|err| ConvertError::Filesystem(format!("write {dest}: {}", err.error)))?;
    Ok(())
}
