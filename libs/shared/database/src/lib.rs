pub mod memory;
pub mod store;

pub use memory::MemoryStore;
pub use store::{decode, encode, DatabaseError, DocumentStore, Filter, StoredDocument, Transaction};
