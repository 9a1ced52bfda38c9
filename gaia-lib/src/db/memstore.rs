use async_trait::async_trait;
use dashmap::DashMap;

use crate::db::store::{AccountStore, ObjectStore, Revision, StoreError};
use crate::model::{Account, Role, WorldObject};
use crate::values::ObjId;

fn next_revision() -> Revision {
    uuid::Uuid::new_v4().simple().to_string()
}

fn check_revision(
    current: Option<&Revision>,
    given: Option<&Revision>,
) -> Result<(), StoreError> {
    match (current, given) {
        (None, None) => Ok(()),
        (Some(c), Some(g)) if c == g => Ok(()),
        (c, g) => Err(StoreError::Conflict {
            given: g.cloned(),
            current: c.cloned(),
        }),
    }
}

/// In-memory document store, the default backend and the one all tests use.
#[derive(Default)]
pub struct MemObjectStore {
    docs: DashMap<ObjId, (WorldObject, Revision)>,
}

impl MemObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemObjectStore {
    async fn fetch(&self, id: &ObjId) -> Result<Option<(WorldObject, Revision)>, StoreError> {
        Ok(self.docs.get(id).map(|e| e.value().clone()))
    }

    async fn store(
        &self,
        obj: &WorldObject,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        use dashmap::mapref::entry::Entry;
        let rev = next_revision();
        match self.docs.entry(obj.id.clone()) {
            Entry::Occupied(mut entry) => {
                check_revision(Some(&entry.get().1), prior)?;
                entry.insert((obj.clone(), rev.clone()));
            }
            Entry::Vacant(entry) => {
                check_revision(None, prior)?;
                entry.insert((obj.clone(), rev.clone()));
            }
        }
        Ok(rev)
    }

    async fn delete_by_id(&self, id: &ObjId, prior: Option<&Revision>) -> Result<(), StoreError> {
        let Some(entry) = self.docs.get(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        check_revision(Some(&entry.value().1), prior)?;
        drop(entry);
        self.docs.remove(id);
        Ok(())
    }

    async fn list_by_index(
        &self,
        index: &str,
        key: &str,
    ) -> Result<Vec<(WorldObject, Revision)>, StoreError> {
        match index {
            "location" => Ok(self
                .docs
                .iter()
                .filter(|e| {
                    e.value()
                        .0
                        .location_id
                        .as_ref()
                        .map(|l| l.as_str() == key)
                        .unwrap_or(false)
                })
                .map(|e| e.value().clone())
                .collect()),
            _ => Err(StoreError::Backend(format!("unknown index: {}", index))),
        }
    }
}

#[derive(Default)]
pub struct MemAccountStore {
    docs: DashMap<String, (Account, Revision)>,
}

impl MemAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemAccountStore {
    async fn fetch(&self, id: &str) -> Result<Option<(Account, Revision)>, StoreError> {
        Ok(self.docs.get(id).map(|e| e.value().clone()))
    }

    async fn fetch_by_login(
        &self,
        login: &str,
    ) -> Result<Option<(Account, Revision)>, StoreError> {
        Ok(self
            .docs
            .iter()
            .find(|e| e.value().0.login.eq_ignore_ascii_case(login))
            .map(|e| e.value().clone()))
    }

    async fn store(
        &self,
        account: &Account,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        use dashmap::mapref::entry::Entry;
        let rev = next_revision();
        match self.docs.entry(account.id.clone()) {
            Entry::Occupied(mut entry) => {
                check_revision(Some(&entry.get().1), prior)?;
                entry.insert((account.clone(), rev.clone()));
            }
            Entry::Vacant(entry) => {
                check_revision(None, prior)?;
                entry.insert((account.clone(), rev.clone()));
            }
        }
        Ok(rev)
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<(Account, Revision)>, StoreError> {
        Ok(self
            .docs
            .iter()
            .filter(|e| e.value().0.roles.contains(&role))
            .map(|e| e.value().clone())
            .collect())
    }
}
