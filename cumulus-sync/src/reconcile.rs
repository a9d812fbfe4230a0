use cumulus_core::{FileReply, parse_etag};
use tracing::{debug, warn};

use crate::i18n::tr;
use crate::item::{Instruction, ItemStatus, SyncItem, UploadFileInfo, parent_dir};
use crate::journal::UploadInfo;
use crate::localfs;
use crate::propagator::BulkPropagator;
use crate::vfs::{ConvertToPlaceholderResult, PinState};

impl BulkPropagator {
    /// Per-item handling of a successful reply: poll hand-off on 202,
    /// etag/file-id adoption, then the post-upload drift checks before the
    /// journal is brought up to date.
    pub(crate) async fn reconcile(
        &mut self,
        mut item: SyncItem,
        info: UploadFileInfo,
        reply: FileReply,
    ) {
        // The server needs more time; it handed us a poll URL instead of a
        // final answer.
        if item.http_status == 202 {
            if reply.job_status_location.is_empty() {
                self.done(item, ItemStatus::NormalError, tr("Poll URL missing"));
                return;
            }
            self.start_poll(item, info, reply.job_status_location).await;
            return;
        }

        if !reply.oc_etag.is_empty() && !reply.etag.is_empty() && reply.oc_etag != reply.etag {
            debug!(file = %item.file, oc_etag = %reply.oc_etag, etag = %reply.etag, "reply carries diverging etags");
        }
        let etag = parse_etag(if reply.oc_etag.is_empty() {
            &reply.etag
        } else {
            &reply.oc_etag
        });
        let finished = !etag.is_empty();

        let full_path = self.ctx.full_local_path(&item.file);
        if !localfs::file_exists(&full_path).await {
            if !finished {
                self.abort_with_error(
                    item,
                    ItemStatus::SoftError,
                    tr("The local file was removed during sync."),
                );
                return;
            }
            self.ctx.another_sync_needed = true;
        }

        // The values being compared were recorded when hashing began.
        if !localfs::verify_file_unchanged(&full_path, item.size, item.modtime).await {
            self.ctx.another_sync_needed = true;
            if !finished {
                self.abort_with_error(
                    item,
                    ItemStatus::SoftError,
                    tr("Local file changed during sync."),
                );
                return;
            }
        }

        if !reply.file_id.is_empty() {
            if !item.file_id.is_empty() && item.file_id != reply.file_id {
                warn!(file = %item.file, old = %item.file_id, new = %reply.file_id, "file id changed");
            }
            item.file_id = reply.file_id.clone();
        }

        item.etag = etag;

        if reply.mtime_ack != "accepted" {
            // The server will serve its own timestamp for this file.
            warn!(file = %item.file, ack = %reply.mtime_ack, "server did not preserve the modification time");
        }

        self.finalize(item, info).await;
    }

    /// Closes an item out after the server holds the final content:
    /// journal metadata, pin state, quota expectation, progress-record
    /// cleanup, then Success.
    pub(crate) async fn finalize(&mut self, item: SyncItem, info: UploadFileInfo) {
        match self.ctx.journal.update_metadata(&item) {
            Err(err) => {
                self.done(
                    item,
                    ItemStatus::FatalError,
                    format!("Error updating metadata: {err}"),
                );
                return;
            }
            Ok(ConvertToPlaceholderResult::Locked) => {
                let message = format!("The file {} is currently in use", item.file);
                self.done(item, ItemStatus::SoftError, message);
                return;
            }
            Ok(ConvertToPlaceholderResult::Ok) => {}
        }

        // A file the server just accepted must not stay dehydrated, even
        // inside an online-only folder.
        if matches!(item.instruction, Instruction::New | Instruction::TypeChange)
            && self.ctx.vfs.pin_state(&item.file) == Some(PinState::OnlineOnly)
            && !self.ctx.vfs.set_pin_state(&item.file, PinState::Unspecified)
        {
            warn!(file = %item.file, "could not clear online-only pin state");
        }

        if let Some(quota) = self.ctx.folder_quota.get_mut(&parent_dir(&item.file)) {
            *quota -= info.size;
        }

        if let Err(err) = self
            .ctx
            .journal
            .set_upload_info(&item.file, UploadInfo::default())
        {
            warn!(file = %item.file, %err, "could not clear progress record");
        }
        self.ctx.journal.commit("upload finished");

        self.done(item, ItemStatus::Success, String::new());
    }
}
