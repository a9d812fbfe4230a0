use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::item::SyncItem;
use crate::vfs::ConvertToPlaceholderResult;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal write failed: {0}")]
    Write(String),
    #[error("placeholder conversion failed: {0}")]
    Placeholder(String),
}

/// Progress record written before a network request goes out, so an
/// interrupted upload can be recognized on the next run. A default record
/// (`valid == false`) clears the row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadInfo {
    pub valid: bool,
    /// Always 0 here; chunked uploads count their chunks in this field.
    pub chunk: u32,
    /// Always 0 here; chunked uploads track their transfer session.
    pub transfer_id: u64,
    pub modtime: i64,
    pub error_count: u32,
    pub content_checksum: String,
    pub size: i64,
}

/// Pending server-side finalization: the server answered 202 and told us
/// where to ask for the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollInfo {
    pub file: String,
    pub url: String,
    pub modtime: i64,
    pub file_size: i64,
}

/// Base-version bookkeeping of a conflicted file, forwarded to the server
/// as `OC-Conflict*` headers.
#[derive(Debug, Clone, Default)]
pub struct ConflictRecord {
    pub initial_base_path: Option<String>,
    pub base_file_id: Option<String>,
    pub base_modtime: Option<i64>,
    pub base_etag: Option<String>,
}

/// Suppression record for a path that keeps failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistEntry {
    pub file: String,
    pub retry_count: u32,
    pub error_string: String,
    pub last_try_modtime: i64,
    pub last_try_etag: String,
    pub last_try_time: i64,
    /// Seconds the path stays suppressed; 0 tracks without suppressing.
    pub ignore_duration: i64,
}

/// The slice of the sync journal the upload propagation touches. The
/// on-disk database lives outside this crate; embedders hand in their own
/// implementation. Reads of absent rows return defaults, mirroring the
/// journal's key-value contract.
pub trait Journal: Send {
    fn upload_info(&self, file: &str) -> UploadInfo;
    fn set_upload_info(&mut self, file: &str, info: UploadInfo) -> Result<(), JournalError>;

    fn poll_info(&self, file: &str) -> Option<PollInfo>;
    fn set_poll_info(&mut self, info: PollInfo) -> Result<(), JournalError>;
    fn clear_poll_info(&mut self, file: &str) -> Result<(), JournalError>;

    fn conflict_record(&self, file: &str) -> Option<ConflictRecord>;

    /// Marks the parent of `file` for re-discovery on the next sync, used
    /// to invalidate a possibly stale cached etag.
    fn schedule_path_for_remote_discovery(&mut self, file: &str) -> Result<(), JournalError>;

    fn blacklist_entry(&self, file: &str) -> Option<BlacklistEntry>;
    fn set_blacklist_entry(&mut self, entry: BlacklistEntry) -> Result<(), JournalError>;
    fn wipe_blacklist_entry(&mut self, file: &str) -> Result<(), JournalError>;

    /// Writes the reconciled item back to the file metadata table and lets
    /// the virtual-file backend refresh its placeholder.
    fn update_metadata(&mut self, item: &SyncItem)
    -> Result<ConvertToPlaceholderResult, JournalError>;

    fn commit(&mut self, context: &str);
}

/// Metadata row kept by [`MemoryJournal`]; what `update_metadata` persists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub etag: String,
    pub file_id: String,
    pub modtime: i64,
    pub size: i64,
    pub checksum_header: String,
}

#[derive(Default)]
struct MemoryJournalInner {
    upload_info: HashMap<String, UploadInfo>,
    poll_info: HashMap<String, PollInfo>,
    conflicts: HashMap<String, ConflictRecord>,
    blacklist: HashMap<String, BlacklistEntry>,
    metadata: HashMap<String, FileMetadata>,
    discovery_paths: Vec<String>,
    commits: Vec<String>,
    metadata_result: Option<ConvertToPlaceholderResult>,
    metadata_error: Option<String>,
}

/// In-memory journal. Cheap handle; clones share the same state, so a test
/// can keep one clone for inspection while the propagator owns another.
#[derive(Clone, Default)]
pub struct MemoryJournal(Arc<Mutex<MemoryJournalInner>>);

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_conflict_record(&self, file: &str, record: ConflictRecord) {
        self.lock().conflicts.insert(file.to_string(), record);
    }

    /// Makes every following `update_metadata` call report the placeholder
    /// as locked.
    pub fn set_metadata_locked(&self) {
        self.lock().metadata_result = Some(ConvertToPlaceholderResult::Locked);
    }

    /// Makes every following `update_metadata` call fail.
    pub fn set_metadata_failure(&self, message: &str) {
        self.lock().metadata_error = Some(message.to_string());
    }

    pub fn metadata_for(&self, file: &str) -> Option<FileMetadata> {
        self.lock().metadata.get(file).cloned()
    }

    pub fn scheduled_discovery_paths(&self) -> Vec<String> {
        self.lock().discovery_paths.clone()
    }

    pub fn commit_tags(&self) -> Vec<String> {
        self.lock().commits.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryJournalInner> {
        self.0.lock().expect("journal mutex poisoned")
    }
}

impl Journal for MemoryJournal {
    fn upload_info(&self, file: &str) -> UploadInfo {
        self.lock().upload_info.get(file).cloned().unwrap_or_default()
    }

    fn set_upload_info(&mut self, file: &str, info: UploadInfo) -> Result<(), JournalError> {
        let mut inner = self.lock();
        if info == UploadInfo::default() {
            inner.upload_info.remove(file);
        } else {
            inner.upload_info.insert(file.to_string(), info);
        }
        Ok(())
    }

    fn poll_info(&self, file: &str) -> Option<PollInfo> {
        self.lock().poll_info.get(file).cloned()
    }

    fn set_poll_info(&mut self, info: PollInfo) -> Result<(), JournalError> {
        self.lock().poll_info.insert(info.file.clone(), info);
        Ok(())
    }

    fn clear_poll_info(&mut self, file: &str) -> Result<(), JournalError> {
        self.lock().poll_info.remove(file);
        Ok(())
    }

    fn conflict_record(&self, file: &str) -> Option<ConflictRecord> {
        self.lock().conflicts.get(file).cloned()
    }

    fn schedule_path_for_remote_discovery(&mut self, file: &str) -> Result<(), JournalError> {
        self.lock().discovery_paths.push(file.to_string());
        Ok(())
    }

    fn blacklist_entry(&self, file: &str) -> Option<BlacklistEntry> {
        self.lock().blacklist.get(file).cloned()
    }

    fn set_blacklist_entry(&mut self, entry: BlacklistEntry) -> Result<(), JournalError> {
        self.lock().blacklist.insert(entry.file.clone(), entry);
        Ok(())
    }

    fn wipe_blacklist_entry(&mut self, file: &str) -> Result<(), JournalError> {
        self.lock().blacklist.remove(file);
        Ok(())
    }

    fn update_metadata(
        &mut self,
        item: &SyncItem,
    ) -> Result<ConvertToPlaceholderResult, JournalError> {
        let mut inner = self.lock();
        if let Some(message) = &inner.metadata_error {
            return Err(JournalError::Write(message.clone()));
        }
        if let Some(result) = inner.metadata_result {
            return Ok(result);
        }
        inner.metadata.insert(
            item.file.clone(),
            FileMetadata {
                etag: item.etag.clone(),
                file_id: item.file_id.clone(),
                modtime: item.modtime,
                size: item.size,
                checksum_header: item.checksum_header.clone(),
            },
        );
        Ok(ConvertToPlaceholderResult::Ok)
    }

    fn commit(&mut self, context: &str) {
        self.lock().commits.push(context.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Instruction;

    #[test]
    fn default_upload_info_clears_the_row() {
        let mut journal = MemoryJournal::new();
        journal
            .set_upload_info(
                "a.txt",
                UploadInfo {
                    valid: true,
                    modtime: 5,
                    size: 1,
                    ..UploadInfo::default()
                },
            )
            .unwrap();
        assert!(journal.upload_info("a.txt").valid);

        journal.set_upload_info("a.txt", UploadInfo::default()).unwrap();
        assert_eq!(journal.upload_info("a.txt"), UploadInfo::default());
    }

    #[test]
    fn clones_share_state() {
        let journal = MemoryJournal::new();
        let mut writer = journal.clone();
        writer
            .set_poll_info(PollInfo {
                file: "a.txt".into(),
                url: "/poll/1".into(),
                modtime: 3,
                file_size: 9,
            })
            .unwrap();
        assert!(journal.poll_info("a.txt").is_some());
        writer.clear_poll_info("a.txt").unwrap();
        assert!(journal.poll_info("a.txt").is_none());
    }

    #[test]
    fn update_metadata_persists_reconciled_fields() {
        let mut journal = MemoryJournal::new();
        let mut item = SyncItem::new("a.txt", Instruction::New);
        item.etag = "abc".into();
        item.file_id = "42".into();
        item.size = 5;

        let result = journal.update_metadata(&item).unwrap();
        assert_eq!(result, ConvertToPlaceholderResult::Ok);
        let record = journal.metadata_for("a.txt").unwrap();
        assert_eq!(record.etag, "abc");
        assert_eq!(record.file_id, "42");
    }
}
