use async_trait::async_trait;
use thiserror::Error;

use crate::model::{Account, Role, WorldObject};
use crate::values::ObjId;

/// Opaque revision string supplied by the store.
pub type Revision = String;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("revision conflict (submitted {given:?}, current {current:?})")]
    Conflict {
        given: Option<Revision>,
        current: Option<Revision>,
    },

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Contract between the world cache and whatever document database sits
/// behind it. Writes are optimistic: a mismatched prior revision yields
/// `StoreError::Conflict` and the caller refetches and merges.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch(&self, id: &ObjId) -> Result<Option<(WorldObject, Revision)>, StoreError>;

    async fn store(
        &self,
        obj: &WorldObject,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError>;

    async fn delete_by_id(&self, id: &ObjId, prior: Option<&Revision>) -> Result<(), StoreError>;

    /// Secondary-index lookup. The world collection maintains `location`;
    /// others may exist depending on the backend.
    async fn list_by_index(
        &self,
        index: &str,
        key: &str,
    ) -> Result<Vec<(WorldObject, Revision)>, StoreError>;
}

/// The accounts collection, indexed on login ID and on role. Touched only by
/// the login and admin paths, never by the game loop.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<(Account, Revision)>, StoreError>;

    async fn fetch_by_login(&self, login: &str)
        -> Result<Option<(Account, Revision)>, StoreError>;

    async fn store(
        &self,
        account: &Account,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError>;

    async fn list_by_role(&self, role: Role) -> Result<Vec<(Account, Revision)>, StoreError>;
}
