use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Suffix of files still being written
pub const PART_SUFFIX: &str = ".part";

/// Bytes of the files this node hosts, one blob per CID under `root`
pub struct LocalStore {
    root: PathBuf,
    blobs: DashMap<String, PathBuf>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            blobs: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    /// Persist a blob; writing the same CID twice keeps the first copy
    pub async fn put(&self, cid: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        if let Some(path) = self.path(cid) {
            return Ok(path);
        }

        fs::create_dir_all(&self.root).await?;
        let path = self.root.join(cid);
        let tmp = self.root.join(format!("{}{}", cid, PART_SUFFIX));

        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, &path).await?;

        self.blobs.insert(cid.to_string(), path.clone());
        Ok(path)
    }

    /// Adopt a file already written at `path` (e.g. a verified download)
    pub fn adopt(&self, cid: &str, path: PathBuf) {
        self.blobs.insert(cid.to_string(), path);
    }

    pub fn path(&self, cid: &str) -> Option<PathBuf> {
        self.blobs.get(cid).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, cid: &str) -> bool {
        self.blobs.contains_key(cid)
    }

    /// Open a hosted blob for streaming, with its length
    pub async fn open(&self, cid: &str) -> io::Result<Option<(fs::File, u64)>> {
        let Some(path) = self.path(cid) else {
            return Ok(None);
        };

        let file = fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Some((file, len)))
    }

    pub async fn remove(&self, cid: &str) -> io::Result<bool> {
        match self.blobs.remove(cid) {
            Some((_, path)) => {
                fs::remove_file(path).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_read() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("shared"));
        store.init().await.unwrap();

        let path = store.put("kx-abc", b"hello").await.unwrap();
        assert!(path.exists());
        assert!(store.contains("kx-abc"));
        assert_eq!(fs::read(&path).await.unwrap(), b"hello");

        let (_, len) = store.open("kx-abc").await.unwrap().unwrap();
        assert_eq!(len, 5);
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        assert!(store.path("kx-none").is_none());
        assert!(store.open("kx-none").await.unwrap().is_none());
        assert!(!store.remove("kx-none").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        let path = store.put("kx-del", b"bytes").await.unwrap();
        assert!(store.remove("kx-del").await.unwrap());
        assert!(!path.exists());
        assert!(store.is_empty());
    }
}
