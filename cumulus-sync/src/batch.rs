use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::Body;
use tokio_util::io::ReaderStream;

use crate::i18n::tr;
use crate::item::{ItemStatus, SyncItem, UploadFileInfo};
use crate::localfs;
use crate::progress::{ProgressSink, ProgressStream};

/// One fully prepared part of the current batch, alive from assembly until
/// its reply is reconciled.
pub(crate) struct PreparedUpload {
    pub item: SyncItem,
    pub info: UploadFileInfo,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub content_length: i64,
    pub headers: BTreeMap<String, String>,
}

pub(crate) struct SteadinessError {
    pub status: ItemStatus,
    pub error: String,
    pub another_sync_needed: bool,
}

/// Re-checks the file after the (possibly slow) checksum work: it must
/// still exist and must not have been touched since hashing began. Sizes
/// are refreshed here; they go into `Content-Length`.
pub(crate) async fn steady_after_checksum(
    item: &mut SyncItem,
    info: &mut UploadFileInfo,
    original_path: &Path,
) -> Result<(), SteadinessError> {
    if !localfs::file_exists(&info.path).await {
        return Err(SteadinessError {
            status: ItemStatus::SoftError,
            error: tr("The local file was removed during sync."),
            another_sync_needed: false,
        });
    }

    let hashed_modtime = item.modtime;
    match localfs::mod_time(original_path).await {
        Ok(current) if current == hashed_modtime => {}
        Ok(current) => {
            item.modtime = current;
            return Err(SteadinessError {
                status: ItemStatus::SoftError,
                error: tr("Local file changed during syncing. It will be resumed."),
                another_sync_needed: true,
            });
        }
        Err(_) => {
            return Err(SteadinessError {
                status: ItemStatus::SoftError,
                error: tr("The local file was removed during sync."),
                another_sync_needed: false,
            });
        }
    }

    if let Ok(size) = localfs::file_size(&info.path).await {
        info.size = size;
    }
    if let Ok(size) = localfs::file_size(original_path).await {
        item.size = size;
    }

    Ok(())
}

/// Opens the read stream of one part. The transport consumes it
/// incrementally; every chunk that leaves is reported through `sink`.
pub(crate) async fn open_upload_body(path: &Path, sink: ProgressSink) -> io::Result<Body> {
    let file = tokio::fs::File::open(path).await?;
    let stream = ProgressStream::new(ReaderStream::new(file), sink);
    Ok(Body::wrap_stream(stream))
}
