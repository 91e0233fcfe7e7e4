use std::sync::{Arc, RwLock};

use crate::{
    datafile::DatafileContent,
    datafile_reader::{DatafileDiff, DatafileReader},
    regex_cache::RegexCache,
};

/// `DatafileStore` provides a Sync storage for the current datafile that allows concurrent access
/// for readers and writers.
///
/// Readers get an `Arc` snapshot and keep evaluating against it even if the datafile is replaced
/// in the meantime.
#[derive(Debug)]
pub(crate) struct DatafileStore {
    reader: RwLock<Arc<DatafileReader>>,
    regex_cache: Arc<RegexCache>,
}

impl DatafileStore {
    pub fn new(content: DatafileContent) -> Self {
        let regex_cache = Arc::new(RegexCache::new());
        Self {
            reader: RwLock::new(Arc::new(DatafileReader::new(
                content,
                regex_cache.clone(),
            ))),
            regex_cache,
        }
    }

    pub fn get_reader(&self) -> Arc<DatafileReader> {
        // self.reader.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen.
        let reader = self
            .reader
            .read()
            .expect("thread holding datafile lock should not panic");
        reader.clone()
    }

    /// Set new datafile, returning the difference with the previous one.
    pub fn set_datafile(&self, content: DatafileContent) -> DatafileDiff {
        // Constructing new value before requesting the lock to minimize lock span.
        let new_reader = Arc::new(DatafileReader::new(content, self.regex_cache.clone()));

        let previous = {
            let mut slot = self
                .reader
                .write()
                .expect("thread holding datafile lock should not panic");
            std::mem::replace(&mut *slot, new_reader.clone())
        };

        new_reader.diff(&previous)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::datafile::DatafileContent;

    use super::DatafileStore;

    fn content(revision: &str) -> DatafileContent {
        DatafileContent {
            revision: revision.to_owned(),
            ..DatafileContent::default()
        }
    }

    #[test]
    fn can_set_datafile_from_another_thread() {
        let store = Arc::new(DatafileStore::new(content("1")));

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.set_datafile(content("2"));
            })
            .join();
        }

        assert_eq!(store.get_reader().get_revision(), "2");
    }

    #[test]
    fn snapshot_survives_replacement() {
        let store = DatafileStore::new(content("1"));
        let snapshot = store.get_reader();

        let diff = store.set_datafile(content("2"));
        assert_eq!(diff.previous_revision, "1");
        assert_eq!(diff.revision, "2");

        assert_eq!(snapshot.get_revision(), "1");
        assert_eq!(store.get_reader().get_revision(), "2");
    }
}
