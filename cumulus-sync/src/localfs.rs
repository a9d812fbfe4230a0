use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Modification time in whole seconds since the epoch.
pub async fn mod_time(path: &Path) -> io::Result<i64> {
    let meta = tokio::fs::metadata(path).await?;
    let modified = meta.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

pub async fn file_size(path: &Path) -> io::Result<i64> {
    Ok(tokio::fs::metadata(path).await?.len() as i64)
}

pub async fn file_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

/// Best-effort check whether another process holds the file open
/// exclusively. Sharing violations surface as PermissionDenied on Windows;
/// mandatory locks report WouldBlock.
pub async fn is_file_locked(path: &Path) -> bool {
    match tokio::fs::OpenOptions::new().write(true).open(path).await {
        Ok(_) => false,
        Err(err) => matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::PermissionDenied
        ),
    }
}

/// True when size and modification time still match what was recorded
/// earlier; the cheap stand-in for "nobody touched this file meanwhile".
pub async fn verify_file_unchanged(path: &Path, size: i64, modtime: i64) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let current_modtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    meta.len() as i64 == size && current_modtime == modtime
}

pub async fn rename_file(from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::rename(from, to).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn verify_detects_size_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let modtime = mod_time(&path).await.unwrap();
        assert!(verify_file_unchanged(&path, 5, modtime).await);
        assert!(!verify_file_unchanged(&path, 6, modtime).await);
        assert!(!verify_file_unchanged(&path, 5, modtime + 1).await);
    }

    #[tokio::test]
    async fn verify_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        assert!(!verify_file_unchanged(&dir.path().join("gone"), 0, 0).await);
        assert!(!file_exists(&dir.path().join("gone")).await);
    }

    #[tokio::test]
    async fn rename_moves_the_file() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("foo ");
        let to = dir.path().join("foo");
        std::fs::write(&from, b"x").unwrap();

        rename_file(&from, &to).await.unwrap();
        assert!(file_exists(&to).await);
        assert!(!file_exists(&from).await);
    }
}
