use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Create `path`, and its missing parents when `recursive` is set.
///
/// `mode` is applied to every directory created on Unix and ignored
/// elsewhere. A non-recursive call fails with `AlreadyExists` when the
/// directory is already there.
pub async fn create_dir(path: &Path, recursive: bool, mode: Option<u32>) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        if let Some(mode) = mode {
            builder.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder.create(path).await
}

pub(crate) async fn write_file(
    path: &Path,
    bytes: &[u8],
    dir_mode: Option<u32>,
    file_mode: Option<u32>,
) -> std::io::Result<u64> {
    if let Some(parent) = path.parent() {
        create_dir(parent, true, dir_mode).await?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        if let Some(mode) = file_mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = file_mode;

    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(bytes.len() as u64)
}
