use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::store::{matches_all, DatabaseError, DocumentStore, Filter, StoredDocument, Transaction};

#[derive(Debug, Clone)]
struct Versioned {
    data: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, BTreeMap<String, Versioned>>,
    last_version: u64,
}

impl StoreState {
    fn version_of(&self, collection: &str, key: &str) -> Option<u64> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|doc| doc.version)
    }

    fn scan<'a>(&'a self, collection: &str, filters: &'a [Filter]) -> impl Iterator<Item = (&'a String, &'a Versioned)> + 'a {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(move |(_, doc)| matches_all(filters, &doc.data))
    }

    fn fingerprint(&self, collection: &str, filters: &[Filter]) -> Vec<(String, u64)> {
        self.scan(collection, filters)
            .map(|(key, doc)| (key.clone(), doc.version))
            .collect()
    }
}

#[derive(Debug, Clone)]
struct UniqueIndex {
    name: String,
    collection: String,
    fields: Vec<String>,
}

impl UniqueIndex {
    /// `None` when the document lacks one of the indexed fields.
    fn key_of(&self, document: &Value) -> Option<String> {
        let values: Option<Vec<&Value>> = self.fields.iter().map(|f| document.get(f)).collect();
        values.map(|v| Value::from(v.into_iter().cloned().collect::<Vec<_>>()).to_string())
    }
}

/// In-process document store with optimistic, serializable transactions.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    indexes: Arc<Vec<UniqueIndex>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a unique key over `fields` for documents in `collection`,
    /// enforced at commit time.
    pub fn with_unique_index(mut self, collection: &str, fields: &[&str]) -> Self {
        let index = UniqueIndex {
            name: format!("{}_{}_key", collection, fields.join("_")),
            collection: collection.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        };
        Arc::make_mut(&mut self.indexes).push(index);
        self
    }

    pub async fn document_count(&self, collection: &str) -> usize {
        let state = self.state.read().await;
        state.collections.get(collection).map_or(0, |docs| docs.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            indexes: Arc::clone(&self.indexes),
            reads: HashMap::new(),
            queries: Vec::new(),
            writes: BTreeMap::new(),
        }))
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(key))
            .map(|doc| doc.data.clone()))
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let state = self.state.read().await;
        Ok(state
            .scan(collection, filters)
            .map(|(key, doc)| StoredDocument {
                key: key.clone(),
                data: doc.data.clone(),
            })
            .collect())
    }
}

#[derive(Debug)]
struct RecordedQuery {
    collection: String,
    filters: Vec<Filter>,
    seen: Vec<(String, u64)>,
}

type DocKey = (String, String);

pub struct MemoryTransaction {
    state: Arc<RwLock<StoreState>>,
    indexes: Arc<Vec<UniqueIndex>>,
    reads: HashMap<DocKey, Option<u64>>,
    queries: Vec<RecordedQuery>,
    writes: BTreeMap<DocKey, Option<Value>>,
}

impl MemoryTransaction {
    fn validate_read_set(&self, state: &StoreState) -> Result<(), DatabaseError> {
        for ((collection, key), seen) in &self.reads {
            if state.version_of(collection, key) != *seen {
                debug!("Read of {}/{} is stale", collection, key);
                return Err(DatabaseError::Conflict);
            }
        }

        for query in &self.queries {
            if state.fingerprint(&query.collection, &query.filters) != query.seen {
                debug!("Query on {} {:?} is stale", query.collection, query.filters);
                return Err(DatabaseError::Conflict);
            }
        }

        Ok(())
    }

    fn validate_unique_indexes(&self, state: &StoreState) -> Result<(), DatabaseError> {
        for index in self.indexes.iter() {
            let touched = self.writes.keys().any(|(collection, _)| *collection == index.collection);
            if !touched {
                continue;
            }

            let committed = state
                .collections
                .get(&index.collection)
                .into_iter()
                .flat_map(|docs| docs.iter())
                .filter(|(key, _)| !self.writes.contains_key(&(index.collection.clone(), (*key).clone())))
                .map(|(key, doc)| (key.as_str(), &doc.data));

            let pending = self
                .writes
                .iter()
                .filter(|((collection, _), _)| *collection == index.collection)
                .filter_map(|((_, key), doc)| doc.as_ref().map(|d| (key.as_str(), d)));

            let mut owners: HashMap<String, &str> = HashMap::new();
            for (key, document) in committed.chain(pending) {
                let Some(unique_key) = index.key_of(document) else {
                    continue;
                };
                if let Some(existing) = owners.insert(unique_key, key) {
                    warn!("Unique index {} violated by {} and {}", index.name, existing, key);
                    return Err(DatabaseError::UniqueViolation {
                        collection: index.collection.clone(),
                        index: index.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, collection: &str, key: &str) -> Result<Option<Value>, DatabaseError> {
        let doc_key = (collection.to_string(), key.to_string());
        if let Some(buffered) = self.writes.get(&doc_key) {
            return Ok(buffered.clone());
        }

        let state = self.state.read().await;
        let current = state.collections.get(collection).and_then(|docs| docs.get(key));
        self.reads
            .entry(doc_key)
            .or_insert_with(|| current.map(|doc| doc.version));

        Ok(current.map(|doc| doc.data.clone()))
    }

    async fn query(
        &mut self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<StoredDocument>, DatabaseError> {
        let mut results: BTreeMap<String, Value> = {
            let state = self.state.read().await;
            let mut seen = Vec::new();
            let mut results = BTreeMap::new();
            for (key, doc) in state.scan(collection, filters) {
                seen.push((key.clone(), doc.version));
                results.insert(key.clone(), doc.data.clone());
            }
            self.queries.push(RecordedQuery {
                collection: collection.to_string(),
                filters: filters.to_vec(),
                seen,
            });
            results
        };

        for ((write_collection, key), document) in &self.writes {
            if write_collection != collection {
                continue;
            }
            match document {
                Some(doc) if matches_all(filters, doc) => {
                    results.insert(key.clone(), doc.clone());
                }
                _ => {
                    results.remove(key);
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|(key, data)| StoredDocument { key, data })
            .collect())
    }

    fn set(&mut self, collection: &str, key: &str, document: Value) {
        self.writes
            .insert((collection.to_string(), key.to_string()), Some(document));
    }

    fn delete(&mut self, collection: &str, key: &str) {
        self.writes.insert((collection.to_string(), key.to_string()), None);
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let this = *self;
        let mut state = this.state.write().await;

        this.validate_read_set(&state)?;
        this.validate_unique_indexes(&state)?;

        if this.writes.is_empty() {
            return Ok(());
        }

        state.last_version += 1;
        let version = state.last_version;
        let write_count = this.writes.len();

        for ((collection, key), document) in this.writes {
            let docs = state.collections.entry(collection).or_default();
            match document {
                Some(data) => {
                    docs.insert(key, Versioned { data, version });
                }
                None => {
                    docs.remove(&key);
                }
            }
        }

        debug!("Committed {} writes at version {}", write_count, version);
        Ok(())
    }

    async fn abort(self: Box<Self>) {
        debug!(
            "Aborted transaction with {} buffered writes and {} reads",
            self.writes.len(),
            self.reads.len() + self.queries.len()
        );
    }
}
