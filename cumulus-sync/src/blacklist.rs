use tracing::{info, warn};

use crate::item::{ItemStatus, SyncItem};
use crate::journal::{BlacklistEntry, Journal};

const MIN_IGNORE_SECS: i64 = 25;
const MAX_IGNORE_SECS: i64 = 24 * 60 * 60;

/// Folds a terminal error into the blacklist table, and possibly adjusts
/// the status: a path that was already suppressed stays suppressed, a soft
/// error that keeps happening gets louder. Local-only failures (no HTTP
/// code) never blacklist; they clear any stale entry instead.
pub(crate) fn update(journal: &mut dyn Journal, item: &mut SyncItem, now: i64) {
    let old = journal.blacklist_entry(&item.file);

    let may_blacklist = matches!(
        item.status,
        ItemStatus::NormalError | ItemStatus::SoftError | ItemStatus::DetailError
    ) && item.http_status != 0;

    if !may_blacklist {
        if old.is_some() && let Err(err) = journal.wipe_blacklist_entry(&item.file) {
            warn!(file = %item.file, %err, "could not wipe blacklist entry");
        }
        return;
    }

    let entry = next_entry(old.as_ref(), item, now);
    let suppressing = entry.ignore_duration > 0;
    let retry_count = entry.retry_count;
    if let Err(err) = journal.set_blacklist_entry(entry) {
        warn!(file = %item.file, %err, "could not persist blacklist entry");
        return;
    }

    if item.has_blacklist_entry && suppressing {
        info!(file = %item.file, retry_count, "suppressing repeatedly failing file");
        item.status = ItemStatus::BlacklistedError;
        return;
    }

    if item.status == ItemStatus::SoftError && retry_count > 1 {
        warn!(file = %item.file, retry_count, "escalating repeated soft error");
        item.status = ItemStatus::NormalError;
    }
}

fn next_entry(old: Option<&BlacklistEntry>, item: &SyncItem, now: i64) -> BlacklistEntry {
    let retry_count = old.map(|entry| entry.retry_count).unwrap_or(0) + 1;
    let ignore_duration = (MIN_IGNORE_SECS << (retry_count - 1).min(16)).min(MAX_IGNORE_SECS);
    BlacklistEntry {
        file: item.file.clone(),
        retry_count,
        error_string: item.error_string.clone(),
        last_try_modtime: item.modtime,
        last_try_etag: item.etag.clone(),
        last_try_time: now,
        ignore_duration,
    }
}
