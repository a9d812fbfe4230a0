mod backoff;
mod batch;
mod blacklist;
mod checksum;
mod i18n;
mod poll;
mod preflight;
mod progress;
mod reconcile;

pub mod context;
pub mod errors;
pub mod headers;
pub mod item;
pub mod journal;
pub mod localfs;
pub mod propagator;
pub mod vfs;

pub use context::{SyncContext, SyncEvent, SyncOptions};
pub use item::{Instruction, ItemStatus, SyncItem, UploadFileInfo};
pub use journal::{
    BlacklistEntry, ConflictRecord, Journal, JournalError, MemoryJournal, PollInfo, UploadInfo,
};
pub use propagator::{BulkPropagator, MAX_BATCH_ITEMS};
pub use vfs::{ConvertToPlaceholderResult, MemoryVfs, OffVfs, PinState, Vfs};
