use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{ListPage, ObjectStore, StoreError};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// In-process object store. Records every successful put in order so
/// callers can assert on upload sequencing, and can be told to fail the
/// next few puts or to report itself unavailable.
#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    put_log: Mutex<Vec<String>>,
    page_size: usize,
    unavailable: AtomicBool,
    failing_puts: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            put_log: Mutex::new(Vec::new()),
            page_size: DEFAULT_PAGE_SIZE,
            unavailable: AtomicBool::new(false),
            failing_puts: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Seed objects without recording them as uploads.
    pub fn with_objects<I, K>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        {
            let mut objects = self.objects.lock();
            for key in keys {
                objects.insert(key.into(), Bytes::new());
            }
        }
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `count` puts fail.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Keys in the order they were successfully put.
    pub fn put_log(&self) -> Vec<String> {
        self.put_log.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn exists(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::backend("head_bucket", "store marked unavailable"))
        } else {
            Ok(())
        }
    }

    async fn list_objects(
        &self,
        continuation: Option<String>,
    ) -> Result<ListPage, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::backend(
                "list_objects_v2",
                "store marked unavailable",
            ));
        }

        let objects = self.objects.lock();
        let mut remaining = objects
            .keys()
            .filter(|key| match continuation.as_deref() {
                Some(after) => key.as_str() > after,
                None => true,
            })
            .peekable();

        let mut keys = Vec::new();
        while keys.len() < self.page_size {
            match remaining.next() {
                Some(key) => keys.push(key.clone()),
                None => break,
            }
        }

        let next_continuation = if remaining.peek().is_some() {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys,
            next_continuation,
        })
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<(), StoreError> {
        let failed = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();
        if failed {
            return Err(StoreError::backend("put_object", "injected failure"));
        }

        self.objects.lock().insert(key.to_string(), body);
        self.put_log.lock().push(key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn paginates_with_continuation() {
        let store = MemoryStore::new()
            .with_page_size(2)
            .with_objects(["a", "b", "c", "d", "e"]);

        let mut continuation = None;
        let mut pages = Vec::new();
        loop {
            let page = store.list_objects(continuation).await.unwrap();
            pages.push(page.keys);
            continuation = page.next_continuation;
            if continuation.is_none() {
                break;
            }
        }

        assert_eq!(
            pages,
            vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]
        );
    }

    #[tokio::test]
    async fn injected_put_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_puts(1);

        assert!(store.put_object("k", Bytes::new()).await.is_err());
        assert!(store.put_object("k", Bytes::new()).await.is_ok());
        assert_eq!(store.put_log(), vec!["k"]);
    }
}
