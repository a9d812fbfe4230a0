use std::collections::BTreeMap;

use crate::item::{EMPTY_ETAG, Instruction, SyncItem};
use crate::journal::ConflictRecord;

/// Marker the admin-triggered recall machinery embeds in file names; such
/// files carry a tag header so the server can stage them away from the
/// user's area.
const RECALL_MARKER: &str = ".sys.admin#recall#";

/// Base headers of one upload part. `X-File-Path`, `X-File-MD5`,
/// `Content-Length` and `OC-Total-Length` are attached later by the batch
/// assembly, which knows the effective name, checksum and size.
pub fn build_headers(
    item: &SyncItem,
    conflict: Option<&ConflictRecord>,
    lazy_ops: bool,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(
        "Content-Type".to_string(),
        "application/octet-stream".to_string(),
    );
    headers.insert("X-File-Mtime".to_string(), item.modtime.to_string());
    if lazy_ops {
        headers.insert("OC-LazyOps".to_string(), "true".to_string());
    }

    if item.file.contains(RECALL_MARKER) {
        headers.insert("OC-Tag".to_string(), RECALL_MARKER.to_string());
    }

    // The server always quotes etags, so the precondition must be quoted
    // too. New files and type changes never send one.
    if !item.etag.is_empty()
        && item.etag != EMPTY_ETAG
        && item.instruction != Instruction::New
        && item.instruction != Instruction::TypeChange
    {
        headers.insert("If-Match".to_string(), format!("\"{}\"", item.etag));
    }

    if let Some(record) = conflict {
        headers.insert("OC-Conflict".to_string(), "1".to_string());
        if let Some(base_path) = &record.initial_base_path {
            headers.insert("OC-ConflictInitialBasePath".to_string(), base_path.clone());
        }
        if let Some(file_id) = &record.base_file_id {
            headers.insert("OC-ConflictBaseFileId".to_string(), file_id.clone());
        }
        if let Some(modtime) = record.base_modtime {
            headers.insert("OC-ConflictBaseMtime".to_string(), modtime.to_string());
        }
        if let Some(etag) = &record.base_etag {
            headers.insert("OC-ConflictBaseEtag".to_string(), etag.clone());
        }
    }

    headers
}
