use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{env, path::Path};

use cumulus_core::DavClient;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::item::SyncItem;
use crate::journal::Journal;
use crate::vfs::Vfs;

/// Files modified more recently than this are assumed to still be written
/// to and are deferred to the next run.
const DEFAULT_MIN_FILE_AGE: Duration = Duration::from_secs(2);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub min_file_age_for_upload: Duration,
    /// Adds `OC-LazyOps: true` to every upload part.
    pub lazy_ops: bool,
    pub request_timeout: Duration,
    pub upload_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            min_file_age_for_upload: DEFAULT_MIN_FILE_AGE,
            lazy_ops: env_flag("OWNCLOUD_LAZYOPS"),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            upload_concurrency: read_limit("CUMULUS_UPLOAD_CONCURRENCY", 2),
        }
    }
}

/// Everything the outer sync engine observes while a propagation runs.
#[derive(Debug)]
pub enum SyncEvent {
    ItemCompleted(SyncItem),
    /// A 507 (or a quota pre-check) told us the folder is full.
    InsufficientRemoteStorage,
    /// Opening a local file failed because something holds it locked.
    SeenLockedFile(PathBuf),
    Progress { sent: i64, total: i64 },
}

/// Shared state of one propagation run: the account client, the journal,
/// the virtual-file backend, the quota expectations and the flags the run
/// communicates back to the scheduler.
pub struct SyncContext {
    pub client: DavClient,
    pub journal: Box<dyn Journal>,
    pub vfs: Box<dyn Vfs>,
    /// Absolute root of the sync folder on disk.
    pub local_root: PathBuf,
    /// Server-side folder the sync root maps to, e.g. `"/"`.
    pub remote_root: String,
    pub options: SyncOptions,
    /// Expected remaining space per parent directory; absent means
    /// unlimited. Only ever decreased within a run, except on 507.
    pub folder_quota: HashMap<String, i64>,
    /// Relative paths the discovery phase flagged as case-clashing.
    pub case_clash_paths: HashSet<String>,
    /// Asks the scheduler for another pass once this one ends.
    pub another_sync_needed: bool,
    pub abort: CancellationToken,
    /// Gate on concurrent upload requests, shared with sibling jobs.
    pub upload_limit: Arc<Semaphore>,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl SyncContext {
    pub fn new(
        client: DavClient,
        journal: Box<dyn Journal>,
        vfs: Box<dyn Vfs>,
        local_root: PathBuf,
        options: SyncOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let upload_limit = Arc::new(Semaphore::new(options.upload_concurrency.max(1)));
        (
            Self {
                client,
                journal,
                vfs,
                local_root,
                remote_root: "/".to_string(),
                options,
                folder_quota: HashMap::new(),
                case_clash_paths: HashSet::new(),
                another_sync_needed: false,
                abort: CancellationToken::new(),
                upload_limit,
                events,
            },
            receiver,
        )
    }

    pub fn full_local_path(&self, rel: &str) -> PathBuf {
        let mut out = self.local_root.clone();
        for part in Path::new(rel).components() {
            out.push(part);
        }
        out
    }

    pub fn full_remote_path(&self, rel: &str) -> String {
        format!(
            "{}/{}",
            self.remote_root.trim_end_matches('/'),
            rel.trim_start_matches('/')
        )
    }

    pub fn has_case_clash(&self, rel: &str) -> bool {
        self.case_clash_paths.contains(rel)
    }

    /// Remaining space we expect the folder to accept; unlimited when the
    /// server never told us otherwise.
    pub fn quota_guess(&self, dir: &str) -> i64 {
        self.folder_quota.get(dir).copied().unwrap_or(i64::MAX)
    }

    pub fn abort_requested(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub fn request_abort(&self) {
        self.abort.cancel();
    }

    pub fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn events_sender(&self) -> mpsc::UnboundedSender<SyncEvent> {
        self.events.clone()
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .map(|value| value != 0)
        .unwrap_or(false)
}

fn read_limit(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
