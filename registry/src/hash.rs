use crate::error::RegistryError;
use crate::error::Result;
use sha2::Digest;
use sha2::Sha256;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

/// Hex SHA-256 digests of a whole file and of its leading bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashes {
    pub content_hash: String,
    pub partial_hash: String,
}

/// Hash `path` in one pass. The first `partial_size` bytes feed both hashers;
/// a file shorter than that has identical digests.
pub fn hash_file(path: &Path, partial_size: usize) -> std::io::Result<FileHashes> {
    let mut file = File::open(path)?;
    let mut partial = Sha256::new();
    let mut full = Sha256::new();

    let mut head = Vec::with_capacity(partial_size.min(1 << 20));
    let read = (&mut file).take(partial_size as u64).read_to_end(&mut head)?;
    partial.update(&head);
    full.update(&head);
    let partial_hash = format!("{:x}", partial.finalize());

    if read < partial_size {
        return Ok(FileHashes {
            content_hash: partial_hash.clone(),
            partial_hash,
        });
    }

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        full.update(&buf[..n]);
    }
    Ok(FileHashes {
        content_hash: format!("{:x}", full.finalize()),
        partial_hash,
    })
}

/// [`hash_file`] on the blocking pool.
pub async fn hash_file_blocking(path: PathBuf, partial_size: usize) -> Result<FileHashes> {
    tokio::task::spawn_blocking(move || hash_file(&path, partial_size))
        .await
        .map_err(|e| RegistryError::Io(std::io::Error::other(e)))?
        .map_err(RegistryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sha256_hex(bytes: &[u8]) -> String {
        format!("{:x}", Sha256::digest(bytes))
    }

    #[test]
    fn test_small_file_has_equal_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.txt");
        std::fs::write(&path, b"hello").unwrap();

        let hashes = hash_file(&path, 64 * 1024).unwrap();
        assert_eq!(hashes.content_hash, sha256_hex(b"hello"));
        assert_eq!(hashes.partial_hash, hashes.content_hash);
    }

    #[test]
    fn test_large_file_hashes_prefix_and_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let hashes = hash_file(&path, 64 * 1024).unwrap();
        assert_eq!(hashes.content_hash, sha256_hex(&data));
        assert_eq!(hashes.partial_hash, sha256_hex(&data[..64 * 1024]));
        assert_ne!(hashes.partial_hash, hashes.content_hash);
    }

    #[tokio::test]
    async fn test_identical_content_hashes_identically() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let ha = hash_file_blocking(a, 4).await.unwrap();
        let hb = hash_file_blocking(b, 4).await.unwrap();
        assert_eq!(ha, hb);
    }
}
