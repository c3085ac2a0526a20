use crate::{
    config::EconomyConfig,
    store::{
        AtomicBatch,
        Keyspace,
        Store,
        decode,
        encode,
    },
    user::{
        UserId,
        UserState,
    },
};
use anyhow::Context;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use uuid::Uuid;

/// Where the code was advertised, so the message can be edited once it is spent.
#[derive(PartialEq, Eq, Debug, Copy, Clone)]
pub struct Advert {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub struct ActiveCode {
    pub issued_by: UserId,
    /// Epoch millis.
    pub issued_at: i64,
    pub advert: Option<Advert>,
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CodeRecord", into = "CodeRecord")]
pub enum Code {
    Active(ActiveCode),
    Inactive,
}

impl Code {
    pub fn is_active(&self) -> bool {
        matches!(self, Code::Active(_))
    }

    pub fn as_active(&self) -> Option<&ActiveCode> {
        match self {
            Code::Active(code) => Some(code),
            Code::Inactive => None,
        }
    }
}

// Stored shape: `active` is the discriminant, the rest only exists on active codes.
#[derive(Serialize, Deserialize)]
struct CodeRecord {
    active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issued_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    issued_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_id: Option<i64>,
}

impl TryFrom<CodeRecord> for Code {
    type Error = String;

    fn try_from(record: CodeRecord) -> Result<Self, Self::Error> {
        if !record.active {
            return Ok(Code::Inactive);
        }
        let issued_by = record
            .issued_by
            .ok_or_else(|| "active code without issuer".to_string())?;
        let issued_at = record
            .issued_at
            .ok_or_else(|| "active code without issue time".to_string())?;
        let advert = match (record.chat_id, record.message_id) {
            (Some(chat_id), Some(message_id)) => Some(Advert {
                chat_id,
                message_id,
            }),
            _ => None,
        };
        Ok(Code::Active(ActiveCode {
            issued_by,
            issued_at,
            advert,
        }))
    }
}

impl From<Code> for CodeRecord {
    fn from(code: Code) -> Self {
        match code {
            Code::Inactive => CodeRecord {
                active: false,
                issued_by: None,
                issued_at: None,
                message_id: None,
                chat_id: None,
            },
            Code::Active(code) => CodeRecord {
                active: true,
                issued_by: Some(code.issued_by),
                issued_at: Some(code.issued_at),
                message_id: code.advert.map(|advert| advert.message_id),
                chat_id: code.advert.map(|advert| advert.chat_id),
            },
        }
    }
}

/// Canonical form of a user-typed code, or `None` when it is not a UUID.
pub fn parse_token(raw: &str) -> Option<String> {
    Uuid::try_parse(raw.trim())
        .ok()
        .map(|uuid| uuid.hyphenated().to_string())
}

#[derive(Clone)]
pub struct CodeVault<S> {
    store: S,
    keys: Keyspace,
}

impl<S: Store> CodeVault<S> {
    pub fn new(store: S, config: &EconomyConfig) -> Self {
        Self {
            store,
            keys: Keyspace::new(config.key_namespace.clone()),
        }
    }

    pub fn issue(&self, issuer: UserId, now: DateTime<Utc>) -> crate::Result<String> {
        let token = Uuid::new_v4().hyphenated().to_string();
        let code = Code::Active(ActiveCode {
            issued_by: issuer,
            issued_at: now.timestamp_millis(),
            advert: None,
        });
        let bytes = encode(&code, "gift code")?;
        self.store
            .set(&self.keys.code(&token), bytes)
            .context("persist gift code")?;
        tracing::info!("Issued gift code for issuer {issuer}");
        Ok(token)
    }

    fn peek_raw(&self, token: &str) -> crate::Result<Option<(Vec<u8>, Code)>> {
        let Some(bytes) = self
            .store
            .get(&self.keys.code(token))
            .context("load gift code")?
        else {
            return Ok(None);
        };
        let code = decode(&bytes, "gift code")?;
        Ok(Some((bytes, code)))
    }

    pub fn peek(&self, token: &str) -> crate::Result<Code> {
        Ok(self
            .peek_raw(token)?
            .map(|(_, code)| code)
            .unwrap_or(Code::Inactive))
    }

    /// Attach the advertising message. Returns `false` when the code is no longer active.
    pub fn link(&self, token: &str, chat_id: i64, message_id: i64) -> crate::Result<bool> {
        let Some((bytes, Code::Active(active))) = self.peek_raw(token)? else {
            return Ok(false);
        };
        let linked = Code::Active(ActiveCode {
            advert: Some(Advert {
                chat_id,
                message_id,
            }),
            ..active
        });
        let key = self.keys.code(token);
        let batch = AtomicBatch::new()
            .check(key.clone(), Some(bytes))
            .set(key, encode(&linked, "gift code")?);
        self.store.commit(&batch).context("link gift code")
    }

    /// Spend the code and credit `next_state` in one commit. Exactly one caller wins.
    /// `seen_state` is the user record `next_state` was derived from; the commit fails
    /// if either record changed since.
    pub fn redeem_atomically(
        &self,
        token: &str,
        user: UserId,
        seen_state: &[u8],
        next_state: &UserState,
    ) -> crate::Result<bool> {
        let Some((bytes, Code::Active(_))) = self.peek_raw(token)? else {
            return Ok(false);
        };
        let code_key = self.keys.code(token);
        let user_key = self.keys.user(user);
        let batch = AtomicBatch::new()
            .check(code_key.clone(), Some(bytes))
            .check(user_key.clone(), Some(seen_state.to_vec()))
            .delete(code_key)
            .set(user_key, encode(next_state, "user state")?);
        self.store.commit(&batch).context("commit gift code redemption")
    }
}
