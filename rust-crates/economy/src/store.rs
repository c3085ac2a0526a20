// Key-value persistence used by the ledger and the code vault.
use crate::user::UserId;
use anyhow::{
    Context,
    anyhow,
};
use serde::{
    Serialize,
    de::DeserializeOwned,
};

pub mod in_memory_store;
pub mod sled_store;

pub use in_memory_store::InMemoryStore;
pub use sled_store::SledStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    Update(Vec<u8>),
    Delete,
}

/// Set/delete operations committed all-or-nothing, guarded by value checks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AtomicBatch {
    pub(crate) checks: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    pub(crate) changes: Vec<(Vec<u8>, Status)>,
}

impl AtomicBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to currently hold exactly `expected` (`None` meaning absent).
    pub fn check(mut self, key: impl Into<Vec<u8>>, expected: Option<Vec<u8>>) -> Self {
        self.checks.push((key.into(), expected));
        self
    }

    pub fn set(mut self, key: impl Into<Vec<u8>>, value: Vec<u8>) -> Self {
        self.changes.push((key.into(), Status::Update(value)));
        self
    }

    pub fn delete(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.changes.push((key.into(), Status::Delete));
        self
    }

    pub fn checks(&self) -> &[(Vec<u8>, Option<Vec<u8>>)] {
        &self.checks
    }

    pub fn changes(&self) -> &[(Vec<u8>, Status)] {
        &self.changes
    }
}

pub trait Store {
    fn get(&self, key: &[u8]) -> crate::Result<Option<Vec<u8>>>;

    fn set(&self, key: &[u8], value: Vec<u8>) -> crate::Result<()>;

    fn delete(&self, key: &[u8]) -> crate::Result<()>;

    /// Entries whose key starts with `prefix`, in key order.
    fn list(&self, prefix: &[u8]) -> impl Iterator<Item = crate::Result<Entry>> + '_;

    /// Apply `batch` if every check holds. Returns `false` without writing otherwise.
    fn commit(&self, batch: &AtomicBatch) -> crate::Result<bool>;
}

/// Key layout for one season of the game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyspace {
    namespace: String,
}

impl Keyspace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn users_prefix(&self) -> Vec<u8> {
        format!("{}/users/", self.namespace).into_bytes()
    }

    pub fn user(&self, id: UserId) -> Vec<u8> {
        let mut key = self.users_prefix();
        key.extend_from_slice(id.to_string().as_bytes());
        key
    }

    pub fn user_id_from_key(&self, key: &[u8]) -> crate::Result<UserId> {
        let prefix = self.users_prefix();
        let raw = key
            .strip_prefix(prefix.as_slice())
            .ok_or_else(|| anyhow!("key is outside the users keyspace"))?;
        let raw = std::str::from_utf8(raw).context("user key is not valid UTF-8")?;
        let id = raw
            .parse::<i64>()
            .with_context(|| format!("invalid user id in key: {raw}"))?;
        Ok(UserId(id))
    }

    pub fn code(&self, token: &str) -> Vec<u8> {
        format!("{}-code-treasure/{}", self.namespace, token).into_bytes()
    }
}

pub fn encode<T: Serialize>(value: &T, label: &str) -> crate::Result<Vec<u8>> {
    serde_json::to_vec(value).with_context(|| format!("serialize {label}"))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], label: &str) -> crate::Result<T> {
    serde_json::from_slice(bytes).with_context(|| format!("deserialize {label}"))
}

pub fn get_record<S: Store, T: DeserializeOwned>(
    store: &S,
    key: &[u8],
    label: &str,
) -> crate::Result<Option<T>> {
    match store.get(key).with_context(|| format!("load {label}"))? {
        Some(bytes) => Ok(Some(decode(&bytes, label)?)),
        None => Ok(None),
    }
}

pub fn set_record<S: Store, T: Serialize>(
    store: &S,
    key: &[u8],
    value: &T,
    label: &str,
) -> crate::Result<()> {
    let bytes = encode(value, label)?;
    store
        .set(key, bytes)
        .with_context(|| format!("persist {label}"))
}
