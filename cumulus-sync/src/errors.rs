use crate::item::ItemStatus;

/// How a reply (or its absence) reached us, from the transport's point of
/// view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// An HTTP reply arrived; the status code carries the verdict.
    Status,
    /// The server closed the connection mid-request.
    ConnectionClosed,
    Timeout,
    /// Connect/proxy/TLS failure before any reply.
    Connection,
    Canceled,
}

/// Maps a failed reply to a per-item status. Network-level failures are
/// fatal (nothing else will get through either), except a bare connection
/// close, which some servers produce for single problematic files.
pub fn classify_error(
    transport: TransportKind,
    http_status: u16,
    body: &str,
    another_sync_needed: &mut bool,
) -> ItemStatus {
    match transport {
        TransportKind::ConnectionClosed => return ItemStatus::NormalError,
        TransportKind::Timeout | TransportKind::Connection | TransportKind::Canceled => {
            return ItemStatus::FatalError;
        }
        TransportKind::Status => {}
    }

    match http_status {
        // Service unavailable: maintenance stops the run, transient storage
        // trouble only fails the file.
        503 => {
            let probably_maintenance = body.contains("ServiceUnavailable")
                && !body.contains("Storage is temporarily not available");
            if probably_maintenance {
                ItemStatus::FatalError
            } else {
                ItemStatus::NormalError
            }
        }
        // Precondition failed: the etag moved under us.
        412 => ItemStatus::SoftError,
        423 => {
            *another_sync_needed = true;
            ItemStatus::FileLocked
        }
        _ => ItemStatus::NormalError,
    }
}

/// Pulls a human-readable message out of a server error body. DAV errors
/// carry `<s:message>`, the bulk endpoint may answer JSON with `message`.
pub fn extract_error_message(body: &str) -> Option<String> {
    if let Some(start) = body.find("<s:message>") {
        let rest = &body[start + "<s:message>".len()..];
        if let Some(end) = rest.find("</s:message>") {
            let message = rest[..end].trim();
            if !message.is_empty() {
                return Some(message.to_string());
            }
        }
    }

    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .and_then(|message| message.as_str())
        .filter(|message| !message.is_empty())
        .map(|message| message.to_string())
}
