use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

/// File extension for cache entries
const ENTRY_EXTENSION: &str = "json";

/// Extension for in-progress writes, renamed into place when complete
const TMP_EXTENSION: &str = "tmp";

/// Prefix of every entry file name, so no name starts with a dot
const KEY_PREFIX: &str = "k_";

/// Durable key -> bytes storage for the disk tier.
///
/// Implementations deal in raw bytes; the `CacheManager` owns encoding and
/// treats undecodable bytes as a missing entry. It is also the only caller.
#[async_trait]
pub trait DiskStore: Send + Sync {
    /// Read the stored bytes for a key, `Ok(None)` if nothing is stored
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replace the stored bytes for a key
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Remove a key; removing a missing key is not an error
    async fn remove(&self, key: &str) -> io::Result<()>;

    /// Every key currently stored
    async fn keys(&self) -> io::Result<Vec<String>>;

    /// Remove every key
    async fn clear(&self) -> io::Result<()>;
}

/// One `k_<key>.json` file per key in a dedicated directory.
///
/// Keys are percent-encoded into file names, so any string is a valid key and
/// `keys()` recovers the original. Writes land in a temp file first and are
/// renamed into place, so readers never see a half-written entry.
#[derive(Debug, Clone)]
pub struct FsDiskStore {
    cache_dir: PathBuf,
}

impl FsDiskStore {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to the cache file for the given key
    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", encode_key(key), ENTRY_EXTENSION))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", encode_key(key), TMP_EXTENSION))
    }
}

#[async_trait]
impl DiskStore for FsDiskStore {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.cache_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        let tmp = self.tmp_path(key);
        fs::write(&tmp, bytes).await?;
        if let Err(e) = fs::rename(&tmp, self.cache_path(key)).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.cache_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn keys(&self) -> io::Result<Vec<String>> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut keys = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match decode_key(stem) {
                Some(key) => keys.push(key),
                None => debug!(file = %path.display(), "Skipping cache file with foreign name"),
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> io::Result<()> {
        for key in self.keys().await? {
            self.remove(&key).await?;
        }
        Ok(())
    }
}

fn encode_key(key: &str) -> String {
    format!("{}{}", KEY_PREFIX, urlencoding::encode(key))
}

/// Recover a key from a file stem. Names this store would not have produced
/// come back as `None`.
fn decode_key(stem: &str) -> Option<String> {
    let encoded = stem.strip_prefix(KEY_PREFIX)?;
    let key = urlencoding::decode(encoded).ok()?.into_owned();
    (encode_key(&key) == stem).then_some(key)
}
