use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};
use thiserror::Error;

const SENT_TREE: &str = "sent";

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("corrupt history record: {0}")]
    Codec(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SentMessage {
    pub id: u64,
    pub payload: String,
    pub sent_at: DateTime<Utc>,
}

/// Published payloads keyed by a big-endian id, so iteration is id order.
#[derive(Clone)]
pub struct SentHistory {
    db: Db,
    sent: Tree,
}

impl SentHistory {
    pub fn open(path: &str) -> Result<Self, HistoryError> {
        let db = sled::open(path)?;
        let sent = db.open_tree(SENT_TREE)?;
        Ok(Self { db, sent })
    }

    /// Stores `payload` under the next id. Ids start at 1.
    pub fn record(&self, payload: &str) -> Result<SentMessage, HistoryError> {
        let msg = SentMessage {
            id: self.db.generate_id()? + 1,
            payload: payload.to_string(),
            sent_at: Utc::now(),
        };

        let serialized = serde_json::to_vec(&msg)?;
        self.sent.insert(msg.id.to_be_bytes(), serialized)?;
        self.sent.flush()?;
        Ok(msg)
    }

    pub fn list(&self) -> Result<Vec<SentMessage>, HistoryError> {
        self.sent
            .iter()
            .values()
            .map(|value| -> Result<SentMessage, HistoryError> {
                Ok(serde_json::from_slice(&value?)?)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}

impl std::fmt::Debug for SentHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentHistory")
            .field("db", &"sled::Db")
            .field("records", &self.sent.len())
            .finish()
    }
}
