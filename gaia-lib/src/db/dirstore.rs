use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;

use crate::db::store::{AccountStore, ObjectStore, Revision, StoreError};
use crate::model::{Account, Role, WorldObject};
use crate::values::ObjId;

/// Document store backed by a directory of JSON files, one per document,
/// with the revision carried in a `_rev` field. Suitable for small worlds
/// and operator setups without an external database.
pub struct DirObjectStore {
    dir: PathBuf,
}

pub struct DirAccountStore {
    dir: PathBuf,
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn doc_path(dir: &Path, key: &str) -> PathBuf {
    // IDs are restricted to [A-Za-z0-9_:-]; ':' is path-safe on the
    // platforms this runs on.
    dir.join(format!("{}.json", key))
}

async fn read_doc(path: &Path) -> Result<Option<(serde_json::Value, Revision)>, StoreError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(e)),
    };
    let mut doc: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| StoreError::Backend(e.to_string()))?;
    let rev = doc
        .as_object_mut()
        .and_then(|m| m.remove("_rev"))
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    Ok(Some((doc, rev)))
}

async fn write_doc(
    path: &Path,
    body: serde_json::Value,
    prior: Option<&Revision>,
) -> Result<Revision, StoreError> {
    let current = read_doc(path).await?.map(|(_, rev)| rev);
    match (&current, prior) {
        (None, None) => {}
        (Some(c), Some(g)) if c == g => {}
        (c, g) => {
            return Err(StoreError::Conflict {
                given: g.cloned(),
                current: c.clone(),
            })
        }
    }
    let rev = uuid::Uuid::new_v4().simple().to_string();
    let mut doc = body;
    doc.as_object_mut()
        .expect("document body must be an object")
        .insert("_rev".to_string(), json!(rev));
    let serialized =
        serde_json::to_string_pretty(&doc).map_err(|e| StoreError::Backend(e.to_string()))?;
    tokio::fs::write(path, serialized).await.map_err(io_err)?;
    Ok(rev)
}

async fn remove_doc(path: &Path, prior: Option<&Revision>) -> Result<(), StoreError> {
    let Some((_, current)) = read_doc(path).await? else {
        return Err(StoreError::NotFound(path.display().to_string()));
    };
    match prior {
        Some(g) if *g != current => Err(StoreError::Conflict {
            given: Some(g.clone()),
            current: Some(current),
        }),
        _ => tokio::fs::remove_file(path).await.map_err(io_err),
    }
}

impl DirObjectStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        Ok(Self { dir })
    }

    async fn scan(&self) -> Result<Vec<(WorldObject, Revision)>, StoreError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some((doc, rev)) = read_doc(&path).await? {
                    let obj: WorldObject = serde_json::from_value(doc)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    out.push((obj, rev));
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ObjectStore for DirObjectStore {
    async fn fetch(&self, id: &ObjId) -> Result<Option<(WorldObject, Revision)>, StoreError> {
        match read_doc(&doc_path(&self.dir, id.as_str())).await? {
            None => Ok(None),
            Some((doc, rev)) => {
                let obj =
                    serde_json::from_value(doc).map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some((obj, rev)))
            }
        }
    }

    async fn store(
        &self,
        obj: &WorldObject,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        let body = serde_json::to_value(obj).map_err(|e| StoreError::Backend(e.to_string()))?;
        write_doc(&doc_path(&self.dir, obj.id.as_str()), body, prior).await
    }

    async fn delete_by_id(&self, id: &ObjId, prior: Option<&Revision>) -> Result<(), StoreError> {
        remove_doc(&doc_path(&self.dir, id.as_str()), prior).await
    }

    async fn list_by_index(
        &self,
        index: &str,
        key: &str,
    ) -> Result<Vec<(WorldObject, Revision)>, StoreError> {
        match index {
            "location" => Ok(self
                .scan()
                .await?
                .into_iter()
                .filter(|(o, _)| {
                    o.location_id
                        .as_ref()
                        .map(|l| l.as_str() == key)
                        .unwrap_or(false)
                })
                .collect()),
            _ => Err(StoreError::Backend(format!("unknown index: {}", index))),
        }
    }
}

impl DirAccountStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        Ok(Self { dir })
    }

    async fn scan(&self) -> Result<Vec<(Account, Revision)>, StoreError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Some((doc, rev)) = read_doc(&path).await? {
                    let account: Account = serde_json::from_value(doc)
                        .map_err(|e| StoreError::Backend(e.to_string()))?;
                    out.push((account, rev));
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl AccountStore for DirAccountStore {
    async fn fetch(&self, id: &str) -> Result<Option<(Account, Revision)>, StoreError> {
        match read_doc(&doc_path(&self.dir, id)).await? {
            None => Ok(None),
            Some((doc, rev)) => {
                let account =
                    serde_json::from_value(doc).map_err(|e| StoreError::Backend(e.to_string()))?;
                Ok(Some((account, rev)))
            }
        }
    }

    async fn fetch_by_login(
        &self,
        login: &str,
    ) -> Result<Option<(Account, Revision)>, StoreError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .find(|(a, _)| a.login.eq_ignore_ascii_case(login)))
    }

    async fn store(
        &self,
        account: &Account,
        prior: Option<&Revision>,
    ) -> Result<Revision, StoreError> {
        let body = serde_json::to_value(account).map_err(|e| StoreError::Backend(e.to_string()))?;
        write_doc(&doc_path(&self.dir, &account.id), body, prior).await
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<(Account, Revision)>, StoreError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .filter(|(a, _)| a.roles.contains(&role))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dir_store_round_trip_and_conflict() {
        let dir = std::env::temp_dir().join(format!("gaia-test-{}", uuid::Uuid::new_v4()));
        let store = DirObjectStore::open(&dir).await.unwrap();

        let obj = WorldObject::new(ObjId::new("#a"));
        let rev = store.store(&obj, None).await.unwrap();
        let (fetched, fetched_rev) = store.fetch(&obj.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, obj.id);
        assert_eq!(fetched_rev, rev);

        let err = store.store(&obj, None).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store.delete_by_id(&obj.id, Some(&rev)).await.unwrap();
        assert!(store.fetch(&obj.id).await.unwrap().is_none());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
