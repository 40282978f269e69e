//! Blob filesystem.
//!
//! Content lands in `<root>/.tmp/<document_id>.partial` first and is renamed
//! to `<root>/YYYY/MM/DD/<content_hash>` only after the database commit. Both
//! paths are on the same volume, so the rename is atomic.

use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use custody_core::{ContentHash, DocumentId, StreamingSha256};

const TEMP_DIR: &str = ".tmp";
const TEMP_EXTENSION: &str = "partial";
const READ_CHUNK: usize = 64 * 1024;

/// Size and digest of a blob as found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobDigest {
    pub size: u64,
    pub content_hash: ContentHash,
}

/// Blob storage rooted at one directory.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative final location of a blob: date-partitioned, named by hash.
    pub fn final_path(created_at: DateTime<Utc>, content_hash: &ContentHash) -> String {
        format!("{}/{}", created_at.format("%Y/%m/%d"), content_hash.to_hex())
    }

    /// Absolute path for a stored relative path.
    ///
    /// Rejects absolute paths and `..` so a row cannot point outside the root.
    pub fn resolve(&self, relative: &str) -> io::Result<PathBuf> {
        let rel = Path::new(relative);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean || relative.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("stored path escapes blob root: {relative}"),
            ));
        }
        Ok(self.root.join(rel))
    }

    fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR)
    }

    /// Temp path for a document still being stored.
    pub fn temp_path(&self, id: &DocumentId) -> PathBuf {
        self.temp_dir().join(format!("{id}.{TEMP_EXTENSION}"))
    }

    /// Durably write `content` to the document's temp path.
    pub async fn write_temp(&self, id: &DocumentId, content: &[u8]) -> io::Result<TempBlob> {
        fs::create_dir_all(self.temp_dir()).await?;
        let path = self.temp_path(id);
        // Armed before the first byte so a failed write cleans up too.
        let temp = TempBlob {
            path: path.clone(),
            armed: true,
        };

        let mut file = fs::File::create(&path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        Ok(temp)
    }

    /// Move a temp file to its final relative location.
    pub async fn publish(&self, temp_path: &Path, relative: &str) -> io::Result<()> {
        let target = self.resolve(relative)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(temp_path, &target).await?;
        if let Some(parent) = target.parent() {
            sync_dir(parent).await?;
        }
        Ok(())
    }

    pub async fn exists(&self, relative: &str) -> io::Result<bool> {
        fs::try_exists(self.resolve(relative)?).await
    }

    /// Read a stored blob.
    pub async fn read(&self, relative: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(relative)?).await
    }

    /// Size and hash of a stored blob, `None` if absent.
    pub async fn inspect(&self, relative: &str) -> io::Result<Option<BlobDigest>> {
        digest_file(&self.resolve(relative)?).await
    }

    /// Temp blobs left behind, keyed by the document they belong to.
    ///
    /// Files that do not follow the temp naming scheme are returned with
    /// `None`.
    pub async fn pending(&self) -> io::Result<Vec<(Option<DocumentId>, PathBuf)>> {
        let mut dir = match fs::read_dir(self.temp_dir()).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut pending = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let id = path
                .extension()
                .filter(|ext| *ext == TEMP_EXTENSION)
                .and_then(|_| path.file_stem())
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<DocumentId>().ok());
            pending.push((id, path));
        }
        pending.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(pending)
    }
}

/// Size and hash of any file, `None` if absent.
pub async fn digest_file(path: &Path) -> io::Result<Option<BlobDigest>> {
    let mut file = match fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut hasher = StreamingSha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let size = hasher.len();
    Ok(Some(BlobDigest {
        size,
        content_hash: ContentHash::from_bytes(hasher.finalize()),
    }))
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// A temp blob that is deleted when dropped, unless released.
#[derive(Debug)]
pub struct TempBlob {
    path: PathBuf,
    armed: bool,
}

impl TempBlob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file on disk and hand back its path.
    ///
    /// Called once the document row is committed: from then on the temp
    /// file is the only copy until it is published, and
    /// [`Vault::reconcile`](crate::Vault::reconcile) owns it after a failure.
    pub fn release(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for TempBlob {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_final_path_is_date_partitioned() {
        let at = Utc.with_ymd_and_hms(2026, 3, 7, 15, 0, 0).unwrap();
        let hash = ContentHash::compute(b"x");
        assert_eq!(
            BlobStore::final_path(at, &hash),
            format!("2026/03/07/{}", hash.to_hex())
        );
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let blobs = BlobStore::new("/srv/blobs");
        assert!(blobs.resolve("2026/03/07/abc").is_ok());
        assert!(blobs.resolve("../etc/passwd").is_err());
        assert!(blobs.resolve("/etc/passwd").is_err());
        assert!(blobs.resolve("").is_err());
    }

    #[tokio::test]
    async fn test_dropped_temp_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path());
        let id = DocumentId::new();

        let temp = blobs.write_temp(&id, b"data").await.unwrap();
        assert!(temp.path().exists());
        drop(temp);
        assert!(!blobs.temp_path(&id).exists());
    }

    #[tokio::test]
    async fn test_publish_and_inspect() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path());
        let id = DocumentId::new();
        let hash = ContentHash::compute(b"payload");
        let rel = BlobStore::final_path(Utc::now(), &hash);

        let temp = blobs.write_temp(&id, b"payload").await.unwrap();
        assert_eq!(blobs.pending().await.unwrap(), vec![(Some(id), blobs.temp_path(&id))]);

        let path = temp.release();
        blobs.publish(&path, &rel).await.unwrap();

        assert!(blobs.pending().await.unwrap().is_empty());
        assert_eq!(
            blobs.inspect(&rel).await.unwrap(),
            Some(BlobDigest {
                size: 7,
                content_hash: hash
            })
        );
        assert_eq!(blobs.inspect("2026/01/01/missing").await.unwrap(), None);
    }
}
