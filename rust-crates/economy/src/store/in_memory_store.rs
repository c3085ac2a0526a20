use crate::store::{
    AtomicBatch,
    Entry,
    Status,
    Store,
};
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Mutex,
    },
};

#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for InMemoryStore {
    fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        let guard = self.entries.lock().unwrap();
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> crate::Result<()> {
        let mut guard = self.entries.lock().unwrap();
        guard.insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> crate::Result<()> {
        let mut guard = self.entries.lock().unwrap();
        guard.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &[u8]) -> impl Iterator<Item = crate::Result<Entry>> + '_ {
        let guard = self.entries.lock().unwrap();
        let matching: Vec<Entry> = guard
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| Entry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        matching.into_iter().map(Ok)
    }

    fn commit(&self, batch: &AtomicBatch) -> crate::Result<bool> {
        let mut guard = self.entries.lock().unwrap();
        let checks_hold = batch
            .checks()
            .iter()
            .all(|(key, expected)| guard.get(key) == expected.as_ref());
        if !checks_hold {
            return Ok(false);
        }
        for (key, status) in batch.changes() {
            match status {
                Status::Update(value) => {
                    guard.insert(key.clone(), value.clone());
                }
                Status::Delete => {
                    guard.remove(key);
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn commit__applies_every_change_when_checks_hold() {
        // given
        let store = InMemoryStore::new();
        store.set(b"code", b"active".to_vec()).unwrap();
        let batch = AtomicBatch::new()
            .check(b"code".to_vec(), Some(b"active".to_vec()))
            .check(b"missing".to_vec(), None)
            .delete(b"code".to_vec())
            .set(b"user".to_vec(), b"credited".to_vec());

        // when
        let applied = store.commit(&batch).unwrap();

        // then
        assert!(applied);
        assert_eq!(store.get(b"code").unwrap(), None);
        assert_eq!(store.get(b"user").unwrap(), Some(b"credited".to_vec()));
    }

    #[test]
    fn list__stops_at_the_end_of_the_prefix() {
        // given
        let store = InMemoryStore::new();
        store.set(b"a/1", b"1".to_vec()).unwrap();
        store.set(b"a/2", b"2".to_vec()).unwrap();
        store.set(b"b/1", b"3".to_vec()).unwrap();

        // when
        let values: Vec<Vec<u8>> = store
            .list(b"a/")
            .map(|entry| entry.unwrap().value)
            .collect();

        // then
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }
}
