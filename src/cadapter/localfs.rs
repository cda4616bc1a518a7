//! Local directory backend: one file per object key (implements ObjectBackend).

use crate::cadapter::client::{BackendError, ObjectBackend};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let path = self.path_for(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = self.path_for(key);
        match fs::read(path).await {
            Ok(buf) => Ok(Some(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Box::new(e)),
        };
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // non UTF-8 file names cannot be object keys
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(prefix) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_localfs_put_get_list_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());

        backend.put_object("b.txt", b"bravo").await.unwrap();
        backend.put_object("a.txt", b"alpha").await.unwrap();
        backend.put_object("other", b"").await.unwrap();

        assert_eq!(
            backend.get_object("a.txt").await.unwrap().as_deref(),
            Some(&b"alpha"[..])
        );
        assert_eq!(backend.get_object("missing").await.unwrap(), None);

        let all = backend.list_objects("").await.unwrap();
        assert_eq!(all, vec!["a.txt", "b.txt", "other"]);
        let some = backend.list_objects("a").await.unwrap();
        assert_eq!(some, vec!["a.txt"]);

        backend.delete_object("a.txt").await.unwrap();
        // second delete of the same key is a no-op
        backend.delete_object("a.txt").await.unwrap();
        assert_eq!(backend.get_object("a.txt").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_localfs_list_missing_root_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path().join("not-yet"));
        assert!(backend.list_objects("").await.unwrap().is_empty());
    }
}
