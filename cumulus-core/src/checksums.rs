use std::io;
use std::path::Path;

use md5::Context;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const READ_CHUNK: usize = 64 * 1024;

/// Checksum algorithms the server side understands. The typed header format
/// is `"<TYPE>:<hex>"`, e.g. `"MD5:d41d8cd98f00b204e9800998ecf8427e"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Md5,
    Sha256,
}

impl ChecksumKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumKind::Md5 => "MD5",
            ChecksumKind::Sha256 => "SHA256",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("MD5") {
            Some(ChecksumKind::Md5)
        } else if value.eq_ignore_ascii_case("SHA256") {
            Some(ChecksumKind::Sha256)
        } else {
            None
        }
    }
}

pub fn make_checksum_header(kind: ChecksumKind, hex: &str) -> String {
    format!("{}:{}", kind.as_str(), hex)
}

pub fn parse_checksum_header(header: &str) -> Option<(ChecksumKind, String)> {
    let (kind, hex) = header.split_once(':')?;
    let kind = ChecksumKind::parse(kind)?;
    if hex.is_empty() {
        return None;
    }
    Some((kind, hex.to_string()))
}

/// Hashes the file at `path` incrementally. Large files never sit in memory
/// whole; the digest is fed one read chunk at a time.
pub async fn compute_file_checksum(path: &Path, kind: ChecksumKind) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; READ_CHUNK];
    match kind {
        ChecksumKind::Md5 => {
            let mut ctx = Context::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                ctx.consume(&buf[..n]);
            }
            Ok(format!("{:x}", ctx.compute()))
        }
        ChecksumKind::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(hasher
                .finalize()
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn md5_of_known_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let digest = compute_file_checksum(&path, ChecksumKind::Md5).await.unwrap();
        assert_eq!(digest, "5d41402abc4b2a76b9719d911017c592");
    }

    #[tokio::test]
    async fn sha256_of_known_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        let digest = compute_file_checksum(&path, ChecksumKind::Sha256)
            .await
            .unwrap();
        assert_eq!(
            digest,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn header_parsing_accepts_typed_checksums() {
        assert_eq!(
            parse_checksum_header("MD5:abc123"),
            Some((ChecksumKind::Md5, "abc123".to_string()))
        );
        assert_eq!(
            parse_checksum_header("sha256:ff"),
            Some((ChecksumKind::Sha256, "ff".to_string()))
        );
        assert_eq!(parse_checksum_header("MD5:"), None);
        assert_eq!(parse_checksum_header("ADLER32:abc"), None);
        assert_eq!(parse_checksum_header("garbage"), None);
    }

    #[test]
    fn header_formatting_uses_uppercase_type() {
        assert_eq!(make_checksum_header(ChecksumKind::Md5, "ff"), "MD5:ff");
    }
}
