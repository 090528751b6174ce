//! Local directory destination. Objects are plain files named by their key,
//! written through a `.partial` sibling and renamed into place.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{ListPage, ObjectStore, StoreError};

const PARTIAL_SUFFIX: &str = ".partial";
const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct LocalDirStore {
    root: PathBuf,
    page_size: usize,
}

impl LocalDirStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() || key.contains(['/', '\\']) || key == "." || key == ".." {
            return Err(StoreError::backend(
                "put_object",
                format!("key {key:?} is not a flat object name"),
            ));
        }
        Ok(self.root.join(key))
    }

    async fn sorted_keys(&self) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            keys.push(name);
        }
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for LocalDirStore {
    async fn exists(&self) -> Result<(), StoreError> {
        let metadata = fs::metadata(&self.root).await?;
        if metadata.is_dir() {
            Ok(())
        } else {
            Err(StoreError::backend(
                "head_bucket",
                format!("{} is not a directory", self.root.display()),
            ))
        }
    }

    /// Keys are returned in ascending order; the continuation token is the
    /// last key of the previous page.
    async fn list_objects(
        &self,
        continuation: Option<String>,
    ) -> Result<ListPage, StoreError> {
        let keys = self.sorted_keys().await?;
        let start = match continuation.as_deref() {
            Some(after) => keys.partition_point(|key| key.as_str() <= after),
            None => 0,
        };

        let page: Vec<String> =
            keys.iter().skip(start).take(self.page_size).cloned().collect();
        let next_continuation = if start + page.len() < keys.len() {
            page.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys: page,
            next_continuation,
        })
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let partial = self.root.join(format!("{key}{PARTIAL_SUFFIX}"));

        let mut file = fs::File::create(&partial).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&partial, &path).await?;
        Ok(())
    }
}
