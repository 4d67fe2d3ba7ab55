//! Read interception for witness capture.
//!
//! [`RecordingDb`] sits in front of the store an execution runs against. It
//! knows which keys existed when it was installed and remembers every one of
//! those keys that gets read, together with its value. Nodes written during
//! the execution are never recorded, even if they are read back later.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::debug;
use mpt_store::{NodeDb, StoreResult};
use parking_lot::Mutex;

use crate::witness::WitnessSet;

/// A [`NodeDb`] decorator recording reads of pre-existing keys.
pub struct RecordingDb<D> {
    inner: Arc<D>,
    pre_existing: HashSet<Vec<u8>>,
    recorded: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    active: AtomicBool,
}

impl<D: NodeDb> RecordingDb<D> {
    /// Snapshots the keys currently in `inner` and starts recording.
    pub fn install(inner: Arc<D>) -> StoreResult<Self> {
        let pre_existing: HashSet<_> = inner.keys()?.into_iter().collect();
        debug!(
            "Installed read recorder over {} pre-existing keys",
            pre_existing.len()
        );
        Ok(Self {
            inner,
            pre_existing,
            recorded: Mutex::new(BTreeMap::new()),
            active: AtomicBool::new(true),
        })
    }

    #[cfg(test)]
    fn recorded_len(&self) -> usize {
        self.recorded.lock().len()
    }

    /// Stops recording and hands out everything recorded so far. Reads after
    /// this pass through unrecorded.
    pub fn finish(&self) -> WitnessSet {
        self.active.store(false, Ordering::SeqCst);
        let nodes = std::mem::take(&mut *self.recorded.lock());
        debug!("Read recorder finished with {} witness nodes", nodes.len());
        WitnessSet::from_recorded(nodes)
    }
}

impl<D: NodeDb> NodeDb for RecordingDb<D> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let value = self.inner.get(key)?;
        if let Some(v) = &value {
            if self.active.load(Ordering::SeqCst) && self.pre_existing.contains(key) {
                self.recorded
                    .lock()
                    .entry(key.to_vec())
                    .or_insert_with(|| v.clone());
            }
        }
        Ok(value)
    }

    fn put(&self, key: &[u8], value: Vec<u8>) -> StoreResult<()> {
        self.inner.put(key, value)
    }

    fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> StoreResult<()> {
        self.inner.put_batch(entries)
    }

    fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        self.inner.keys()
    }
}

impl<D> Debug for RecordingDb<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingDb")
            .field("pre_existing", &self.pre_existing.len())
            .field("recorded", &self.recorded.lock().len())
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use mpt_store::MemNodeDb;

    use super::*;

    fn store(entries: &[(&[u8], &[u8])]) -> Arc<MemNodeDb> {
        Arc::new(
            entries
                .iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect(),
        )
    }

    #[test]
    fn only_pre_existing_reads_are_recorded() {
        let inner = store(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let recorder = RecordingDb::install(inner.clone()).unwrap();

        recorder.put(b"new", b"fresh".to_vec()).unwrap();
        assert_eq!(recorder.get(b"new").unwrap(), Some(b"fresh".to_vec()));
        assert_eq!(recorder.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(recorder.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(recorder.get(b"missing").unwrap(), None);
        assert_eq!(recorder.recorded_len(), 1);

        let witness = recorder.finish();
        assert_eq!(witness.len(), 1);
        assert!(witness.contains(b"a"));
        assert!(!witness.contains(b"new"));
        assert!(inner.contains(b"new"));
    }

    #[test]
    fn reads_after_finish_are_not_recorded() {
        let recorder = RecordingDb::install(store(&[(b"a", b"1"), (b"b", b"2")])).unwrap();
        recorder.get(b"a").unwrap();
        let witness = recorder.finish();

        recorder.get(b"b").unwrap();
        assert_eq!(recorder.recorded_len(), 0);
        assert_eq!(witness.len(), 1);
        assert!(!witness.contains(b"b"));
    }

    #[test]
    fn overwritten_pre_existing_keys_record_the_value_read() {
        let recorder = RecordingDb::install(store(&[(b"a", b"old")])).unwrap();
        recorder.put(b"a", b"new".to_vec()).unwrap();
        recorder.get(b"a").unwrap();

        let witness = recorder.finish();
        assert_eq!(witness.get(b"a"), Some(&b"new"[..]));
    }
}
