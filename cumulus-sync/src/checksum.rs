use std::io;
use std::path::Path;

use cumulus_core::{
    Capabilities, compute_file_checksum, make_checksum_header, parse_checksum_header,
};

use crate::item::SyncItem;
use crate::localfs;

/// Prepares the item's checksums and returns the transmission digest (hex,
/// empty when transmission checksums are off).
///
/// At most two hashing passes happen: the content checksum is skipped when
/// the item already carries one of the required type, and it doubles as
/// the transmission checksum whenever the server accepts its type.
pub(crate) async fn prepare(
    item: &mut SyncItem,
    original_path: &Path,
    hash_path: &Path,
    caps: &Capabilities,
) -> io::Result<String> {
    // Remember the modtime before hashing; reconciliation compares against
    // it to spot concurrent modification.
    item.modtime = localfs::mod_time(original_path).await?;

    let existing = parse_checksum_header(&item.checksum_header);
    let content = match caps.preferred_checksum_type {
        Some(required) => match existing {
            Some((kind, hex)) if kind == required => Some((kind, hex)),
            _ => Some((
                required,
                compute_file_checksum(hash_path, required).await?,
            )),
        },
        None => existing,
    };

    if let Some((kind, hex)) = &content {
        item.checksum_header = make_checksum_header(*kind, hex);
    }

    // Reuse the content checksum for transmission when the server accepts
    // its type.
    if let Some((kind, hex)) = &content
        && caps.supported_checksum_types.contains(kind)
    {
        return Ok(hex.clone());
    }

    let Some(upload_kind) = caps.upload_checksum_kind else {
        return Ok(String::new());
    };
    let hex = compute_file_checksum(hash_path, upload_kind).await?;
    if item.checksum_header.is_empty() {
        item.checksum_header = make_checksum_header(upload_kind, &hex);
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Instruction;
    use cumulus_core::ChecksumKind;
    use tempfile::tempdir;

    const HELLO_MD5: &str = "5d41402abc4b2a76b9719d911017c592";

    fn write_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        path
    }

    #[tokio::test]
    async fn computes_content_checksum_when_absent() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir);
        let mut item = SyncItem::new("a.txt", Instruction::New);

        let transmission = prepare(&mut item, &path, &path, &Capabilities::default())
            .await
            .unwrap();

        assert_eq!(item.checksum_header, format!("MD5:{HELLO_MD5}"));
        assert_eq!(transmission, HELLO_MD5);
        assert!(item.modtime > 0);
    }

    #[tokio::test]
    async fn existing_checksum_of_required_type_is_not_recomputed() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir);
        let mut item = SyncItem::new("a.txt", Instruction::Update);
        // Deliberately wrong digest: surviving unchanged proves no rehash.
        item.checksum_header = "MD5:deadbeef".to_string();

        let transmission = prepare(&mut item, &path, &path, &Capabilities::default())
            .await
            .unwrap();

        assert_eq!(item.checksum_header, "MD5:deadbeef");
        assert_eq!(transmission, "deadbeef");
    }

    #[tokio::test]
    async fn transmission_recomputed_when_server_rejects_content_type() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir);
        let mut item = SyncItem::new("a.txt", Instruction::New);
        let caps = Capabilities {
            supported_checksum_types: vec![],
            preferred_checksum_type: Some(ChecksumKind::Sha256),
            upload_checksum_kind: Some(ChecksumKind::Md5),
            reset_error_codes: vec![],
        };

        let transmission = prepare(&mut item, &path, &path, &caps).await.unwrap();

        assert!(item.checksum_header.starts_with("SHA256:"));
        assert_eq!(transmission, HELLO_MD5);
    }

    #[tokio::test]
    async fn disabled_upload_checksum_sends_nothing() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir);
        let mut item = SyncItem::new("a.txt", Instruction::New);
        let caps = Capabilities {
            supported_checksum_types: vec![],
            preferred_checksum_type: Some(ChecksumKind::Md5),
            upload_checksum_kind: None,
            reset_error_codes: vec![],
        };

        let transmission = prepare(&mut item, &path, &path, &caps).await.unwrap();

        assert_eq!(transmission, "");
        assert_eq!(item.checksum_header, format!("MD5:{HELLO_MD5}"));
    }

    #[tokio::test]
    async fn transmission_checksum_is_adopted_when_no_content_type_is_set() {
        let dir = tempdir().unwrap();
        let path = write_file(&dir);
        let mut item = SyncItem::new("a.txt", Instruction::New);
        let caps = Capabilities {
            supported_checksum_types: vec![],
            preferred_checksum_type: None,
            upload_checksum_kind: Some(ChecksumKind::Md5),
            reset_error_codes: vec![],
        };

        let transmission = prepare(&mut item, &path, &path, &caps).await.unwrap();

        assert_eq!(transmission, HELLO_MD5);
        assert_eq!(item.checksum_header, format!("MD5:{HELLO_MD5}"));
    }
}
