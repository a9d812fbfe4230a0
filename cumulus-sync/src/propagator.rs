use std::collections::VecDeque;

use cumulus_core::{BulkPart, DavError, grow_timeout_for_size};
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::batch::{self, PreparedUpload};
use crate::blacklist;
use crate::checksum;
use crate::context::{SyncContext, SyncEvent};
use crate::errors::{TransportKind, classify_error, extract_error_message};
use crate::headers;
use crate::i18n::tr;
use crate::item::{ItemStatus, SyncItem, UploadFileInfo, format_octets, parent_dir};
use crate::journal::UploadInfo;
use crate::localfs;
use crate::poll::PollOutcome;
use crate::preflight;
use crate::progress::ProgressSink;

/// Upper bound of files per bulk request; the 101st waits for the next
/// sub-batch.
pub const MAX_BATCH_ITEMS: usize = 100;

/// Drains a queue of upload intents through preflight, checksumming, one
/// multi-part PUT per sub-batch and per-file reconciliation. Owns the queue
/// and the in-flight poll jobs; emits exactly one terminal status per item.
pub struct BulkPropagator {
    pub(crate) ctx: SyncContext,
    pub(crate) items: VecDeque<SyncItem>,
    pub(crate) final_status: ItemStatus,
    /// Set when this run must not dispatch further requests; the global
    /// abort on the context is the cross-job flag.
    pub(crate) batch_aborted: bool,
    pub(crate) polls: JoinSet<PollOutcome>,
}

impl BulkPropagator {
    pub fn new(ctx: SyncContext, items: Vec<SyncItem>) -> Self {
        Self {
            ctx,
            items: items.into(),
            final_status: ItemStatus::Success,
            batch_aborted: false,
            polls: JoinSet::new(),
        }
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SyncContext {
        &mut self.ctx
    }

    /// Runs to completion: every queued item gets a terminal status, all
    /// poll jobs are waited out, and the aggregated batch status is
    /// returned.
    pub async fn run(&mut self) -> ItemStatus {
        while !self.items.is_empty() {
            if self.ctx.abort_requested() || self.batch_aborted {
                self.flush_aborted();
                break;
            }
            self.run_batch().await;
        }
        self.drain_polls().await;
        info!(final_status = ?self.final_status, "bulk upload finished");
        self.final_status
    }

    async fn run_batch(&mut self) {
        let mut prepared = Vec::new();
        while prepared.len() < MAX_BATCH_ITEMS {
            let Some(item) = self.items.pop_front() else {
                break;
            };
            if self.ctx.abort_requested() {
                self.done(item, ItemStatus::SoftError, tr("Sync was aborted."));
                continue;
            }
            if let Some(upload) = self.prepare_item(item).await {
                prepared.push(upload);
            }
        }

        if self.ctx.abort_requested() {
            for upload in prepared {
                self.done(upload.item, ItemStatus::SoftError, tr("Sync was aborted."));
            }
            return;
        }
        if prepared.is_empty() {
            return;
        }
        self.dispatch(prepared).await;
    }

    async fn prepare_item(&mut self, mut item: SyncItem) -> Option<PreparedUpload> {
        let mut info = UploadFileInfo {
            file: item.file.clone(),
            path: self.ctx.full_local_path(&item.file),
            size: item.size,
        };

        if let Err(rejection) = preflight::validate(&mut self.ctx, &mut item, &mut info).await {
            item.http_status = rejection.http_status;
            self.done(item, rejection.status, rejection.error);
            return None;
        }

        let original_path = self.ctx.full_local_path(&item.file);
        let caps = self.ctx.client.account().capabilities.clone();
        let transmission =
            match checksum::prepare(&mut item, &original_path, &info.path, &caps).await {
                Ok(hex) => hex,
                Err(err) => {
                    self.done(item, ItemStatus::SoftError, err.to_string());
                    return None;
                }
            };

        if let Err(err) = batch::steady_after_checksum(&mut item, &mut info, &original_path).await {
            if err.another_sync_needed {
                self.ctx.another_sync_needed = true;
            }
            self.done(item, err.status, err.error);
            return None;
        }

        // Written before the request goes out: if the connection drops
        // before the etag arrives, the next run can still match on the
        // checksum. The error count survives rewrites.
        let upload_info = UploadInfo {
            valid: true,
            chunk: 0,
            transfer_id: 0,
            modtime: item.modtime,
            error_count: self.ctx.journal.upload_info(&item.file).error_count,
            content_checksum: item.checksum_header.clone(),
            size: item.size,
        };
        if let Err(err) = self.ctx.journal.set_upload_info(&item.file, upload_info) {
            self.done(
                item,
                ItemStatus::FatalError,
                format!("Error writing to the sync journal: {err}"),
            );
            return None;
        }
        self.ctx.journal.commit("upload info");

        let conflict = self.ctx.journal.conflict_record(&item.file);
        let mut part_headers =
            headers::build_headers(&item, conflict.as_ref(), self.ctx.options.lazy_ops);
        let remote_path = self.ctx.full_remote_path(&info.file);
        part_headers.insert("X-File-Path".to_string(), remote_path.clone());
        if !transmission.is_empty() {
            part_headers.insert("X-File-MD5".to_string(), transmission);
        }
        part_headers.insert("Content-Length".to_string(), info.size.to_string());
        part_headers.insert("OC-Total-Length".to_string(), info.size.to_string());

        debug!(file = %item.file, remote = %remote_path, "prepared for bulk upload");
        Some(PreparedUpload {
            local_path: info.path.clone(),
            content_length: info.size,
            remote_path,
            headers: part_headers,
            item,
            info,
        })
    }

    async fn dispatch(&mut self, prepared: Vec<PreparedUpload>) {
        let total: i64 = prepared.iter().map(|upload| upload.content_length).sum();
        let sink = ProgressSink::new(total, self.ctx.events_sender());

        let mut parts = Vec::with_capacity(prepared.len());
        let mut entries: Vec<(SyncItem, UploadFileInfo)> = Vec::with_capacity(prepared.len());
        let mut uploads = prepared.into_iter();
        while let Some(upload) = uploads.next() {
            match batch::open_upload_body(&upload.local_path, sink.clone()).await {
                Ok(body) => {
                    parts.push(BulkPart {
                        headers: upload.headers,
                        body,
                        content_length: upload.content_length.max(0) as u64,
                    });
                    entries.push((upload.item, upload.info));
                }
                Err(err) => {
                    if localfs::is_file_locked(&upload.local_path).await {
                        self.ctx
                            .emit(SyncEvent::SeenLockedFile(upload.local_path.clone()));
                    }
                    warn!(file = %upload.item.file, remote = %upload.remote_path, %err, "could not open upload stream");
                    // Likely the user touching files mid-sync; soft-fail the
                    // item and take the rest of the batch down with it.
                    self.batch_aborted = true;
                    self.done(upload.item, ItemStatus::SoftError, err.to_string());
                    for (item, _) in entries.drain(..) {
                        self.done(item, ItemStatus::SoftError, tr("Sync was aborted."));
                    }
                    for rest in uploads {
                        self.done(rest.item, ItemStatus::SoftError, tr("Sync was aborted."));
                    }
                    return;
                }
            }
        }

        let timeout = grow_timeout_for_size(self.ctx.options.request_timeout, total.max(0) as u64);
        let permit = self.ctx.upload_limit.clone().acquire_owned().await.ok();
        let response = self.ctx.client.bulk_put(parts, timeout).await;
        drop(permit);

        match response {
            Err(err) => {
                warn!(%err, "bulk PUT failed");
                let transport = transport_kind(&err);
                for (item, info) in entries {
                    self.fail_item(item, info, transport, 0, "", err.to_string());
                }
            }
            Ok(reply) if !reply.status.is_success() => {
                let http_status = reply.status.as_u16();
                let fallback = format!("Server replied {}", reply.status);
                let body = reply.body;
                for (mut item, info) in entries {
                    item.request_id = reply.request_id.clone();
                    item.response_timestamp = Some(reply.timestamp);
                    self.fail_item(
                        item,
                        info,
                        TransportKind::Status,
                        http_status,
                        &body,
                        fallback.clone(),
                    );
                }
            }
            Ok(reply) => {
                let http_status = reply.status.as_u16();
                for (mut item, info) in entries {
                    item.http_status = http_status;
                    item.request_id = reply.request_id.clone();
                    item.response_timestamp = Some(reply.timestamp);
                    match reply
                        .replies
                        .iter()
                        .find(|file_reply| file_reply.file_path == item.file)
                    {
                        None => self.done(
                            item,
                            ItemStatus::NormalError,
                            tr("Missing reply from server"),
                        ),
                        Some(file_reply) => self.reconcile(item, info, file_reply.clone()).await,
                    }
                }
            }
        }
    }

    /// Shared handling of a failed reply: message extraction, the 412
    /// discovery fix-up, resetting-error accounting, classification and the
    /// 507 quota adjustment. Ends the batch.
    fn fail_item(
        &mut self,
        mut item: SyncItem,
        info: UploadFileInfo,
        transport: TransportKind,
        http_status: u16,
        body: &str,
        fallback_error: String,
    ) {
        item.http_status = http_status;
        let mut error_string = extract_error_message(body).unwrap_or(fallback_error);
        debug!(file = %item.file, body, "upload error reply");

        if http_status == 412 {
            // The cached parent etag may be what broke the precondition;
            // have discovery re-fetch it.
            self.ctx.another_sync_needed = true;
            if let Err(err) = self.ctx.journal.schedule_path_for_remote_discovery(&item.file) {
                warn!(file = %item.file, %err, "could not schedule remote discovery");
            }
        }

        self.check_resetting_errors(&item, http_status);

        let mut another_sync_needed = self.ctx.another_sync_needed;
        let mut status = classify_error(transport, http_status, body, &mut another_sync_needed);
        self.ctx.another_sync_needed = another_sync_needed;

        if http_status == 507 {
            let guess = info.size - 1;
            self.ctx
                .folder_quota
                .entry(parent_dir(&item.file))
                .and_modify(|quota| *quota = (*quota).min(guess))
                .or_insert(guess);
            status = ItemStatus::DetailError;
            error_string = format!(
                "Upload of {} exceeds the quota for the folder",
                format_octets(info.size)
            );
            self.ctx.emit(SyncEvent::InsufficientRemoteStorage);
        }

        self.abort_with_error(item, status, error_string);
    }

    /// 412 and the account-configured codes count towards resetting a
    /// repeatedly failing upload; after more than three the progress record
    /// is dropped entirely.
    fn check_resetting_errors(&mut self, item: &SyncItem, http_status: u16) {
        let resets = http_status == 412
            || self
                .ctx
                .client
                .account()
                .capabilities
                .reset_error_codes
                .contains(&http_status);
        if !resets {
            return;
        }

        let mut upload_info = self.ctx.journal.upload_info(&item.file);
        upload_info.error_count += 1;
        if upload_info.error_count > 3 {
            info!(file = %item.file, http_status, "resetting transfer after repeated errors");
            upload_info = UploadInfo::default();
        } else {
            info!(
                file = %item.file,
                http_status,
                error_count = upload_info.error_count,
                "counted resetting error"
            );
        }
        if let Err(err) = self.ctx.journal.set_upload_info(&item.file, upload_info) {
            warn!(file = %item.file, %err, "could not update progress record");
        }
        self.ctx.journal.commit("upload info");
    }

    pub(crate) fn abort_with_error(&mut self, item: SyncItem, status: ItemStatus, error: String) {
        self.batch_aborted = true;
        self.done(item, status, error);
    }

    fn flush_aborted(&mut self) {
        while let Some(item) = self.items.pop_front() {
            self.done(item, ItemStatus::SoftError, tr("Sync was aborted."));
        }
    }

    /// Terminal handler: restoration fix-up, abort collapse, blacklist
    /// bookkeeping, final-status aggregation and the completion event.
    /// Every item passes through here exactly once.
    pub(crate) fn done(&mut self, mut item: SyncItem, status: ItemStatus, error: String) {
        item.status = status;

        if item.is_restoration {
            if matches!(item.status, ItemStatus::Success | ItemStatus::Conflict) {
                item.status = ItemStatus::Restoration;
            } else {
                item.error_string
                    .push_str(&format!("; Restoration Failed: {error}"));
            }
        } else if item.error_string.is_empty() {
            item.error_string = error;
        }

        if self.ctx.abort_requested()
            && matches!(item.status, ItemStatus::NormalError | ItemStatus::FatalError)
        {
            item.status = ItemStatus::SoftError;
        }

        match item.status {
            ItemStatus::SoftError
            | ItemStatus::FatalError
            | ItemStatus::NormalError
            | ItemStatus::DetailError => {
                let now = OffsetDateTime::now_utc().unix_timestamp();
                blacklist::update(&mut *self.ctx.journal, &mut item, now);
            }
            ItemStatus::Success | ItemStatus::Restoration => {
                if item.has_blacklist_entry {
                    if let Err(err) = self.ctx.journal.wipe_blacklist_entry(&item.file) {
                        warn!(file = %item.file, %err, "could not wipe blacklist entry");
                    }
                    if let Some(original) = item.original_file.clone()
                        && let Err(err) = self.ctx.journal.wipe_blacklist_entry(&original)
                    {
                        warn!(file = %original, %err, "could not wipe blacklist entry");
                    }
                }
            }
            _ => {}
        }

        if item.status == ItemStatus::FatalError {
            self.ctx.request_abort();
        }

        match item.status {
            ItemStatus::Success => {}
            ItemStatus::DetailError => self.final_status = ItemStatus::DetailError,
            _ => {
                if self.final_status != ItemStatus::DetailError {
                    self.final_status = ItemStatus::NormalError;
                }
            }
        }

        info!(
            file = %item.file,
            status = ?item.status,
            error = %item.error_string,
            "item completed"
        );
        self.ctx.emit(SyncEvent::ItemCompleted(item));
    }
}

fn transport_kind(err: &DavError) -> TransportKind {
    match err {
        DavError::Request(err) if err.is_timeout() => TransportKind::Timeout,
        DavError::Request(err) if err.is_connect() => TransportKind::Connection,
        DavError::Request(_) => TransportKind::ConnectionClosed,
        _ => TransportKind::Connection,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SyncOptions;
    use crate::item::Instruction;
    use crate::journal::MemoryJournal;
    use crate::vfs::OffVfs;
    use cumulus_core::{Account, Capabilities, DavClient};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn make_propagator() -> (BulkPropagator, UnboundedReceiver<SyncEvent>, MemoryJournal) {
        let journal = MemoryJournal::new();
        let account = Account {
            url: url::Url::parse("http://localhost:1").unwrap(),
            user: "alice".into(),
            password: "secret".into(),
            capabilities: Capabilities::default(),
        };
        let (ctx, events) = SyncContext::new(
            DavClient::new(account),
            Box::new(journal.clone()),
            Box::new(OffVfs),
            std::path::PathBuf::from("/nonexistent"),
            SyncOptions::default(),
        );
        (BulkPropagator::new(ctx, Vec::new()), events, journal)
    }

    fn completed(events: &mut UnboundedReceiver<SyncEvent>) -> SyncItem {
        loop {
            match events.try_recv().expect("expected a completion event") {
                SyncEvent::ItemCompleted(item) => return item,
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn restoration_success_is_reported_as_restoration() {
        let (mut propagator, mut events, _journal) = make_propagator();
        let mut item = SyncItem::new("a.txt", Instruction::New);
        item.is_restoration = true;

        propagator.done(item, ItemStatus::Success, String::new());

        let item = completed(&mut events);
        assert_eq!(item.status, ItemStatus::Restoration);
        assert_eq!(propagator.final_status, ItemStatus::Success);
    }

    #[tokio::test]
    async fn failed_restoration_appends_to_the_error_string() {
        let (mut propagator, mut events, _journal) = make_propagator();
        let mut item = SyncItem::new("a.txt", Instruction::New);
        item.is_restoration = true;
        item.error_string = "upload failed".to_string();

        propagator.done(item, ItemStatus::NormalError, "server said no".to_string());

        let item = completed(&mut events);
        assert_eq!(
            item.error_string,
            "upload failed; Restoration Failed: server said no"
        );
    }

    #[tokio::test]
    async fn abort_collapses_hard_errors_to_soft() {
        let (mut propagator, mut events, _journal) = make_propagator();
        propagator.ctx.request_abort();

        let item = SyncItem::new("a.txt", Instruction::New);
        propagator.done(item, ItemStatus::NormalError, "failed".to_string());

        assert_eq!(completed(&mut events).status, ItemStatus::SoftError);
    }

    #[tokio::test]
    async fn fatal_error_requests_global_abort() {
        let (mut propagator, mut events, _journal) = make_propagator();
        let item = SyncItem::new("a.txt", Instruction::New);

        propagator.done(item, ItemStatus::FatalError, "journal broken".to_string());

        assert!(propagator.ctx.abort_requested());
        assert_eq!(completed(&mut events).status, ItemStatus::FatalError);
        assert_eq!(propagator.final_status, ItemStatus::NormalError);
    }

    #[tokio::test]
    async fn detail_error_wins_the_final_status() {
        let (mut propagator, _events, _journal) = make_propagator();
        propagator.done(
            SyncItem::new("a.txt", Instruction::New),
            ItemStatus::DetailError,
            "quota".to_string(),
        );
        propagator.done(
            SyncItem::new("b.txt", Instruction::New),
            ItemStatus::SoftError,
            "later".to_string(),
        );
        assert_eq!(propagator.final_status, ItemStatus::DetailError);
    }

    #[tokio::test]
    async fn success_after_blacklist_wipes_the_entry() {
        let (mut propagator, mut events, journal) = make_propagator();
        let mut writer = journal.clone();
        use crate::journal::{BlacklistEntry, Journal};
        writer
            .set_blacklist_entry(BlacklistEntry {
                file: "a.txt".into(),
                retry_count: 2,
                error_string: "old".into(),
                last_try_modtime: 0,
                last_try_etag: String::new(),
                last_try_time: 0,
                ignore_duration: 25,
            })
            .unwrap();

        let mut item = SyncItem::new("a.txt", Instruction::New);
        item.has_blacklist_entry = true;
        propagator.done(item, ItemStatus::Success, String::new());

        assert_eq!(completed(&mut events).status, ItemStatus::Success);
        assert!(journal.blacklist_entry("a.txt").is_none());
    }
}
