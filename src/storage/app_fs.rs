use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::storage::{Storage, StorageFile};

/// [`Storage`] backed by a directory on the local disk.
#[derive(Clone, Debug)]
pub struct AppFs {
    pub root: PathBuf,
}

/// Where a relative storage path lands on disk.
struct Resolved {
    file: PathBuf,
    dir: PathBuf,
}

impl StorageFile for tokio::fs::File {}

#[async_trait]
impl Storage for AppFs {
    type File = tokio::fs::File;

    async fn exists(&self, path: &str) -> std::io::Result<bool> {
        match tokio::fs::metadata(self.resolve(path).file).await {
            Ok(_) => Ok(true),
            Err(err) if is_missing(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn read(&self, path: &str) -> std::io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.resolve(path).file).await {
            Ok(v) => Ok(Some(v)),
            Err(err) if is_missing(&err) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn write(&self, path: &str, content: impl AsRef<[u8]> + Send) -> std::io::Result<()> {
        let Resolved { file, dir } = self.resolve(path);
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(file, content).await
    }

    async fn create(&self, path: &str) -> std::io::Result<Self::File> {
        let Resolved { file, dir } = self.resolve(path);
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::File::create(file).await
    }

    async fn list(&self, path: &str) -> std::io::Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(self.resolve(path).file).await {
            Ok(v) => v,
            Err(err) if is_missing(&err) => return Ok(vec![]),
            Err(err) => return Err(err),
        };
        let mut entries = vec![];
        while let Some(entry) = dir.next_entry().await? {
            let entry_path = entry.path();
            let Ok(rel) = entry_path.strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push(rel)
        }
        entries.sort();
        Ok(entries)
    }

    async fn mv(&self, from: &str, to: &str) -> std::io::Result<()> {
        let from = self.resolve(from);
        let to = self.resolve(to);
        tokio::fs::create_dir_all(to.dir).await?;
        tokio::fs::rename(from.file, to.file).await
    }
}

impl AppFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute path on disk of a relative storage path.
    pub fn path_buf(&self, path: &str) -> PathBuf {
        self.resolve(path).file
    }

    /// Maps a `/` separated path relative to `root` onto the disk, empty
    /// segments (leading, trailing or repeated slashes) are skipped.
    fn resolve(&self, relative: &str) -> Resolved {
        let mut segments = relative.split('/').filter(|s| !s.is_empty()).collect::<Vec<_>>();
        let file_name = segments.pop();
        let dir = segments
            .into_iter()
            .fold(self.root.clone(), |acc, segment| acc.join(segment));
        let file = match file_name {
            Some(name) => dir.join(name),
            None => dir.clone(),
        };
        Resolved { file, dir }
    }
}

/// Paths that cross a regular file are as missing as paths that don't exist.
fn is_missing(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}
