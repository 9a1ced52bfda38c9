use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;
use tracing::{debug, info};

use crate::compiler::parse_program;
use crate::db::WorldCache;
use crate::model::WorldObject;
use crate::values::{
    commands_object, config_object, root_object, user_object, v_string, ObjId,
};

/// A definition document: a single object or an array of them, in the same
/// schema as the persisted form.
#[derive(Deserialize)]
#[serde(untagged)]
enum Definition {
    One(Box<WorldObject>),
    Many(Vec<WorldObject>),
}

impl Definition {
    fn into_objects(self) -> Vec<WorldObject> {
        match self {
            Definition::One(obj) => vec![*obj],
            Definition::Many(objs) => objs,
        }
    }
}

/// Guarantees the objects the engine itself leans on: the inheritance root,
/// the user parent, the command dispatch object, and `#config`.
pub async fn ensure_core_objects(cache: &WorldCache) -> Result<(), anyhow::Error> {
    for id in [root_object(), user_object(), commands_object(), config_object()] {
        if cache.get(&id).await?.is_none() {
            let obj = if id == root_object() {
                WorldObject::new(id.clone())
            } else {
                WorldObject::with_parent(id.clone(), root_object())
            };
            cache.put(obj).await?;
            debug!(object = %id, "core object created");
        }
    }
    Ok(())
}

/// Loads a directory tree of world definitions: `.yaml`/`.yml`/`.json`
/// object documents, and `.g` files whose source lands in the `run`
/// attribute of the object named by the file stem. Returns the number of
/// objects touched.
pub async fn load_dir(cache: &WorldCache, dir: &Path) -> Result<usize, anyhow::Error> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)
        .with_context(|| format!("walking world definitions under {}", dir.display()))?;
    files.sort();

    let mut loaded = 0;
    for path in files {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        match ext {
            "yaml" | "yml" => {
                let raw = tokio::fs::read_to_string(&path).await?;
                let definition: Definition = serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                for obj in definition.into_objects() {
                    cache.put(obj).await?;
                    loaded += 1;
                }
            }
            "json" => {
                let raw = tokio::fs::read_to_string(&path).await?;
                let definition: Definition = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                for obj in definition.into_objects() {
                    cache.put(obj).await?;
                    loaded += 1;
                }
            }
            "g" => {
                let source = tokio::fs::read_to_string(&path).await?;
                parse_program(&source)
                    .map_err(|e| anyhow::anyhow!("parsing {}: {}", path.display(), e))?;
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or_default();
                let id = ObjId::new(stem);
                if cache.get(&id).await?.is_none() {
                    cache
                        .put(WorldObject::with_parent(id.clone(), root_object()))
                        .await?;
                }
                cache
                    .update(&id, move |o| {
                        o.attributes.insert("run".to_string(), v_string(source));
                    })
                    .await?;
                loaded += 1;
            }
            _ => {}
        }
    }
    info!(count = loaded, dir = %dir.display(), "world definitions loaded");
    Ok(loaded)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), std::io::Error> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::memstore::MemObjectStore;
    use crate::db::ObjectStore;
    use crate::values::{v_str, Value};

    async fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gaia-defs-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    fn cache() -> WorldCache {
        WorldCache::with_defaults(Arc::new(MemObjectStore::new()) as Arc<dyn ObjectStore>)
    }

    #[tokio::test]
    async fn test_core_objects_created_once() {
        let cache = cache();
        ensure_core_objects(&cache).await.unwrap();
        ensure_core_objects(&cache).await.unwrap();
        let root = cache.get_required(&root_object()).await.unwrap();
        assert!(root.parent_ids.is_empty());
        let user = cache.get_required(&user_object()).await.unwrap();
        assert_eq!(user.parent_ids, vec![root_object()]);
    }

    #[tokio::test]
    async fn test_load_yaml_json_and_g() {
        let dir = scratch_dir().await;
        tokio::fs::write(
            dir.join("room.yaml"),
            "id: hall\nname: great hall\nparentIds: [object]\nattributes:\n  description: A hall.\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.join("things.json"),
            r#"[{"id": "sword", "parentIds": ["object"], "locationId": "hall"},
                {"id": "lamp", "parentIds": ["object"]}]"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.join("greeter.g"), "[log \"hello\"]")
            .await
            .unwrap();

        let cache = cache();
        ensure_core_objects(&cache).await.unwrap();
        let loaded = load_dir(&cache, &dir).await.unwrap();
        assert_eq!(loaded, 4);

        assert_eq!(
            cache
                .get_attribute(&ObjId::new("hall"), "description")
                .await
                .unwrap(),
            Some(v_str("A hall."))
        );
        let sword = cache.get_required(&ObjId::new("sword")).await.unwrap();
        assert_eq!(sword.location_id, Some(ObjId::new("hall")));
        let greeter = cache.get_required(&ObjId::new("greeter")).await.unwrap();
        assert!(matches!(
            greeter.own_attribute("run"),
            Some(Value::Str(s)) if s.contains("hello")
        ));

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_malformed_g_file_is_rejected() {
        let dir = scratch_dir().await;
        tokio::fs::write(dir.join("bad.g"), "[unclosed").await.unwrap();
        let cache = cache();
        assert!(load_dir(&cache, &dir).await.is_err());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
