use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Something this transaction read was changed by a concurrent commit.
    #[error("Transaction conflict: data read by this transaction changed before commit")]
    Conflict,

    #[error("Unique constraint {index} violated in collection {collection}")]
    UniqueViolation { collection: String, index: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Write-write conflicts are transient; everything else is not.
    pub fn is_contention(&self) -> bool {
        matches!(self, DatabaseError::Conflict | DatabaseError::UniqueViolation { .. })
    }
}

/// Equality predicate on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn matches(&self, document: &Value) -> bool {
        document.get(&self.field) == Some(&self.value)
    }
}

pub fn matches_all(filters: &[Filter], document: &Value) -> bool {
    filters.iter().all(|f| f.matches(document))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: String,
    pub data: Value,
}

impl StoredDocument {
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, DatabaseError> {
        decode(self.data)
    }
}

pub fn decode<T: DeserializeOwned>(document: Value) -> Result<T, DatabaseError> {
    Ok(serde_json::from_value(document)?)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value, DatabaseError> {
    Ok(serde_json::to_value(value)?)
}

/// A serializable read-modify-write scope. Writes are buffered until
/// [`Transaction::commit`]; [`Transaction::abort`] or dropping the
/// transaction discards them.
#[async_trait]
pub trait Transaction: Send {
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError>;

    async fn query(
        &mut self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<StoredDocument>, DatabaseError>;

    fn set(&mut self, collection: &str, key: &str, document: Value);

    fn delete(&mut self, collection: &str, key: &str);

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    /// Discards buffered writes and releases the transaction.
    async fn abort(self: Box<Self>);
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError>;

    /// Unguarded point read, outside any transaction.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError>;

    /// Unguarded query, outside any transaction. Results are ordered by key.
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<StoredDocument>, DatabaseError>;
}
