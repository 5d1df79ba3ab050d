mod app_fs;

pub use app_fs::*;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// A writable handle returned by [`Storage::create`].
pub trait StorageFile: AsyncWriteExt + Unpin + Send {}

/// Slash separated, relative path storage where configs are persisted.
#[async_trait]
pub trait Storage: Sync + Send + Clone {
    type File: StorageFile;

    async fn exists(&self, path: &str) -> std::io::Result<bool>;
    /// Returns `None` if there is nothing stored at `path`.
    async fn read(&self, path: &str) -> std::io::Result<Option<Vec<u8>>>;
    async fn write(&self, path: &str, content: impl AsRef<[u8]> + Send) -> std::io::Result<()>;
    async fn create(&self, path: &str) -> std::io::Result<Self::File>;
    /// Lists the entries directly under `path`, sorted.
    async fn list(&self, path: &str) -> std::io::Result<Vec<String>>;
    async fn mv(&self, from: &str, to: &str) -> std::io::Result<()>;
}
