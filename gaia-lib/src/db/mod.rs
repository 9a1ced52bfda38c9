pub mod cache;
pub mod dirstore;
pub mod memstore;
pub mod store;

use std::sync::Arc;

pub use cache::{CacheConfig, WorldCache};
pub use store::{AccountStore, ObjectStore, Revision, StoreError};

/// Opens an object store from a connection string: `mem:` for the in-memory
/// backend, `dir:<path>` for the JSON-directory backend.
pub async fn open_object_store(conn: &str) -> Result<Arc<dyn ObjectStore>, StoreError> {
    if conn == "mem:" || conn.is_empty() {
        return Ok(Arc::new(memstore::MemObjectStore::new()));
    }
    if let Some(path) = conn.strip_prefix("dir:") {
        return Ok(Arc::new(dirstore::DirObjectStore::open(path).await?));
    }
    Err(StoreError::Backend(format!(
        "unsupported world store connection string: {}",
        conn
    )))
}

pub async fn open_account_store(conn: &str) -> Result<Arc<dyn AccountStore>, StoreError> {
    if conn == "mem:" || conn.is_empty() {
        return Ok(Arc::new(memstore::MemAccountStore::new()));
    }
    if let Some(path) = conn.strip_prefix("dir:") {
        return Ok(Arc::new(dirstore::DirAccountStore::open(path).await?));
    }
    Err(StoreError::Backend(format!(
        "unsupported account store connection string: {}",
        conn
    )))
}
