mod checksums;
mod client;

pub use checksums::{
    ChecksumKind, compute_file_checksum, make_checksum_header, parse_checksum_header,
};
pub use client::{
    Account, BulkPart, BulkResponse, Capabilities, DavClient, DavError, FileReply, PollReply,
    grow_timeout_for_size, parse_etag,
};
