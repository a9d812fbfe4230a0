use time::OffsetDateTime;

/// Placeholder etag the discovery layer assigns to entries that were never
/// fetched from the server. Must never be sent in an `If-Match` header.
pub const EMPTY_ETAG: &str = "empty_etag";

/// What the sync engine wants done with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// File does not exist on the server yet.
    New,
    /// File exists but changed kind (e.g. file replaced by a symlink).
    TypeChange,
    /// Content update of a file the server already knows.
    Update,
}

/// Terminal (and pre-terminal) per-item outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemStatus {
    #[default]
    NoStatus,
    Success,
    /// Transient; the next sync run retries.
    SoftError,
    NormalError,
    /// Aborts the whole propagation run.
    FatalError,
    /// Quota exhaustion and equivalents; rendered with detail text.
    DetailError,
    Conflict,
    /// Successful re-upload of a previously deleted file.
    Restoration,
    FileIgnored,
    BlacklistedError,
    FileLocked,
    FileNameInvalid,
}

/// One file's sync intent, as handed over by the discovery phase, plus the
/// outcome fields filled in while the upload propagates.
#[derive(Debug, Clone)]
pub struct SyncItem {
    /// Relative path inside the sync folder.
    pub file: String,
    /// Set when the local name needs fixing before upload (trailing spaces).
    pub rename_target: Option<String>,
    pub file_id: String,
    pub size: i64,
    /// Seconds since the epoch.
    pub modtime: i64,
    pub etag: String,
    /// Typed content checksum, e.g. `"MD5:<hex>"`. Empty when unknown.
    pub checksum_header: String,
    pub instruction: Instruction,
    pub is_restoration: bool,
    pub has_blacklist_entry: bool,
    /// Pre-move path, for wiping stale blacklist entries after a rename.
    pub original_file: Option<String>,

    pub status: ItemStatus,
    pub http_status: u16,
    pub error_string: String,
    pub request_id: String,
    pub response_timestamp: Option<OffsetDateTime>,
}

impl SyncItem {
    pub fn new(file: impl Into<String>, instruction: Instruction) -> Self {
        Self {
            file: file.into(),
            rename_target: None,
            file_id: String::new(),
            size: 0,
            modtime: 0,
            etag: String::new(),
            checksum_header: String::new(),
            instruction,
            is_restoration: false,
            has_blacklist_entry: false,
            original_file: None,
            status: ItemStatus::NoStatus,
            http_status: 0,
            error_string: String::new(),
            request_id: String::new(),
            response_timestamp: None,
        }
    }
}

/// Working copy of the file identity for the duration of one batch. Carries
/// the effective (post-rename) name, the absolute local path and the size
/// actually opened for transmission.
#[derive(Debug, Clone)]
pub struct UploadFileInfo {
    pub file: String,
    pub path: std::path::PathBuf,
    pub size: i64,
}

/// Directory component of a relative sync path; the key of the folder
/// quota map. Files at the sync root map to `""`.
pub fn parent_dir(file: &str) -> String {
    file.rsplit_once('/')
        .map(|(dir, _)| dir.to_string())
        .unwrap_or_default()
}

pub fn format_octets(size: i64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let size = size.max(0);
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
