use std::time::Duration;

use cumulus_core::{DavClient, parse_etag};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backoff::PollPacing;
use crate::errors::{TransportKind, classify_error};
use crate::i18n::tr;
use crate::item::{ItemStatus, SyncItem, UploadFileInfo};
use crate::journal::PollInfo;
use crate::propagator::BulkPropagator;

const MAX_POLL_ATTEMPTS: u32 = 10;

/// What a finished poll task reports back to the propagator. `Success`
/// resumes reconciliation; anything else becomes the item's terminal
/// status.
pub(crate) struct PollOutcome {
    pub item: SyncItem,
    pub info: UploadFileInfo,
    pub status: ItemStatus,
    pub error: String,
    pub etag: String,
    pub file_id: String,
}

impl BulkPropagator {
    /// Persists the poll record and starts the poll task. Further
    /// sub-batches keep going while the poll is in flight; the record
    /// stays in the journal until a terminal status is emitted.
    pub(crate) async fn start_poll(
        &mut self,
        item: SyncItem,
        info: UploadFileInfo,
        location: String,
    ) {
        let record = PollInfo {
            file: item.file.clone(),
            url: location.clone(),
            modtime: item.modtime,
            file_size: item.size,
        };
        if let Err(err) = self.ctx.journal.set_poll_info(record) {
            self.done(
                item,
                ItemStatus::FatalError,
                format!("Error writing to the sync journal: {err}"),
            );
            return;
        }
        self.ctx.journal.commit("add poll info");

        info!(file = %item.file, %location, "server deferred the upload, polling");
        let client = self.ctx.client.clone();
        let abort = self.ctx.abort.clone();
        self.polls.spawn(run_poll(client, item, info, location, abort));
    }

    pub(crate) async fn drain_polls(&mut self) {
        while let Some(joined) = self.polls.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(%err, "poll task died");
                    continue;
                }
            };

            if let Err(err) = self.ctx.journal.clear_poll_info(&outcome.item.file) {
                warn!(file = %outcome.item.file, %err, "could not clear poll record");
            }
            self.ctx.journal.commit("remove poll info");

            if outcome.status != ItemStatus::Success {
                self.done(outcome.item, outcome.status, outcome.error);
                continue;
            }

            let mut item = outcome.item;
            if !outcome.etag.is_empty() {
                item.etag = parse_etag(&outcome.etag);
            }
            if !outcome.file_id.is_empty() {
                item.file_id = outcome.file_id;
            }
            self.finalize(item, outcome.info).await;
        }
    }
}

async fn run_poll(
    client: DavClient,
    item: SyncItem,
    info: UploadFileInfo,
    location: String,
    abort: CancellationToken,
) -> PollOutcome {
    let pacing = PollPacing::new(Duration::from_millis(500), Duration::from_secs(30));
    let mut outcome = PollOutcome {
        item,
        info,
        status: ItemStatus::SoftError,
        error: tr("Server did not finish processing the upload in time"),
        etag: String::new(),
        file_id: String::new(),
    };

    for attempt in 0..MAX_POLL_ATTEMPTS {
        if abort.is_cancelled() {
            outcome.error = tr("Sync was aborted.");
            return outcome;
        }
        match client.poll_job_status(&location).await {
            Err(err) => {
                outcome.error = err.to_string();
                return outcome;
            }
            Ok((http, reply)) if http.is_success() && reply.is_pending() => {
                tokio::time::sleep(pacing.delay(attempt)).await;
            }
            Ok((http, _)) if !http.is_success() => {
                let mut another_sync_needed = false;
                outcome.status =
                    classify_error(TransportKind::Status, http.as_u16(), "", &mut another_sync_needed);
                outcome.error = format!("Poll request failed with {http}");
                outcome.item.http_status = http.as_u16();
                return outcome;
            }
            Ok((_, reply)) if reply.status == "error" => {
                outcome.status = if reply.error_code == 507 {
                    ItemStatus::DetailError
                } else {
                    ItemStatus::NormalError
                };
                outcome.error = if reply.error.is_empty() {
                    tr("Server reported an error while finishing the upload")
                } else {
                    reply.error
                };
                outcome.item.http_status = reply.error_code;
                return outcome;
            }
            Ok((_, reply)) => {
                outcome.status = ItemStatus::Success;
                outcome.error = String::new();
                outcome.etag = reply.etag;
                outcome.file_id = reply.file_id;
                return outcome;
            }
        }
    }

    outcome
}
