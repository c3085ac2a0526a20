// Sled-backed implementation of the key-value store.
use crate::store::{
    AtomicBatch,
    Entry,
    Status,
    Store,
};
use anyhow::{
    Context,
    anyhow,
};
use sled::{
    Config,
    Db,
    Tree,
    transaction::{
        ConflictableTransactionResult,
        TransactionError,
    },
};
use std::path::Path;

const STATE_TREE: &str = "economy_state";

#[derive(Clone)]
pub struct SledStore {
    tree: Tree,
}

impl SledStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db
            .open_tree(STATE_TREE)
            .context("open economy_state tree")?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(&db)
    }

    pub fn flush(&self) -> crate::Result<()> {
        self.tree.flush().context("flush economy_state tree")?;
        Ok(())
    }
}

impl Store for SledStore {
    fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>> {
        let value = self.tree.get(key).context("read sled entry")?;
        Ok(value.map(|bytes| bytes.to_vec()))
    }

    fn set(&self, key: &[u8], value: Vec<u8>) -> crate::Result<()> {
        self.tree.insert(key, value).context("write sled entry")?;
        self.tree.flush().context("flush sled entry")?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> crate::Result<()> {
        self.tree.remove(key).context("remove sled entry")?;
        self.tree.flush().context("flush sled removal")?;
        Ok(())
    }

    fn list(&self, prefix: &[u8]) -> impl Iterator<Item = crate::Result<Entry>> + '_ {
        self.tree.scan_prefix(prefix).map(|entry| -> crate::Result<Entry> {
            let (key, value) = entry.context("iterate sled entries")?;
            Ok(Entry {
                key: key.to_vec(),
                value: value.to_vec(),
            })
        })
    }

    fn commit(&self, batch: &AtomicBatch) -> crate::Result<bool> {
        let applied = self
            .tree
            .transaction(|tx| -> ConflictableTransactionResult<bool> {
                for (key, expected) in batch.checks() {
                    let current = tx.get(key.as_slice())?;
                    if current.as_deref() != expected.as_deref() {
                        return Ok(false);
                    }
                }
                for (key, status) in batch.changes() {
                    match status {
                        Status::Update(value) => {
                            tx.insert(key.as_slice(), value.as_slice())?;
                        }
                        Status::Delete => {
                            tx.remove(key.as_slice())?;
                        }
                    }
                }
                Ok(true)
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => anyhow!("sled transaction aborted"),
                TransactionError::Storage(err) => {
                    anyhow::Error::from(err).context("commit sled transaction")
                }
            })?;
        if applied {
            self.tree.flush().context("flush sled transaction")?;
        }
        Ok(applied)
    }
}
