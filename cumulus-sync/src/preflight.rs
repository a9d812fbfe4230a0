use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::context::{SyncContext, SyncEvent};
use crate::i18n::tr;
use crate::item::{ItemStatus, SyncItem, UploadFileInfo, format_octets, parent_dir};
use crate::localfs;

/// Why an item must not go into this batch.
#[derive(Debug)]
pub(crate) struct Rejection {
    pub status: ItemStatus,
    pub http_status: u16,
    pub error: String,
}

impl Rejection {
    fn new(status: ItemStatus, error: String) -> Self {
        Self {
            status,
            http_status: 0,
            error,
        }
    }
}

/// Per-item checks that run before any checksum work: case clashes, the
/// quota expectation, the rename fix-up and the "still being written"
/// guard.
pub(crate) async fn validate(
    ctx: &mut SyncContext,
    item: &mut SyncItem,
    info: &mut UploadFileInfo,
) -> Result<(), Rejection> {
    if ctx.has_case_clash(&info.file) {
        return Err(Rejection::new(
            ItemStatus::NormalError,
            tr("File cannot be uploaded because another file with the same name, differing only in case, exists"),
        ));
    }

    let quota_guess = ctx.quota_guess(&parent_dir(&info.file));
    if info.size > quota_guess {
        ctx.emit(SyncEvent::InsufficientRemoteStorage);
        return Err(Rejection {
            status: ItemStatus::DetailError,
            http_status: 507,
            error: format!(
                "Upload of {} exceeds the quota for the folder",
                format_octets(info.size)
            ),
        });
    }

    if let Some(target) = item.rename_target.clone()
        && target != item.file
    {
        let from = ctx.full_local_path(&item.file);
        let to = ctx.full_local_path(&target);
        if localfs::rename_file(&from, &to).await.is_err() {
            return Err(Rejection::new(
                ItemStatus::NormalError,
                tr("File contains trailing spaces and couldn't be renamed"),
            ));
        }
        item.file = target.clone();
        info.file = target;
        info.path = to;
        match localfs::mod_time(&info.path).await {
            Ok(modtime) => item.modtime = modtime,
            Err(_) => {
                return Err(Rejection::new(
                    ItemStatus::SoftError,
                    tr("The local file was removed during sync."),
                ));
            }
        }
    }

    if file_is_still_changing(item.modtime, now_ms(), ctx.options.min_file_age_for_upload) {
        debug!(file = %item.file, "file too fresh, deferring to the next run");
        ctx.another_sync_needed = true;
        return Err(Rejection::new(
            ItemStatus::SoftError,
            tr("Local file changed during sync."),
        ));
    }

    Ok(())
}

/// A modification time too close to now usually means the file is still
/// being written or copied. Future-dated modification times upload; clocks
/// disagree all the time.
fn file_is_still_changing(modtime_secs: i64, now_ms: i64, min_age: Duration) -> bool {
    let ms_since_mod = now_ms - modtime_secs * 1000;
    ms_since_mod >= 0 && ms_since_mod < min_age.as_millis() as i64
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
