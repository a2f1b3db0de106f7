//! Manifest namespace operations: list, load, delete, tag allocation and
//! retention.
//!
//! Numeric tags (`app:1`, `app:2`, ...) give a name an auto-incrementing
//! version sequence. Non-numeric tags live alongside them and are ignored by
//! the id-based operations.

use hive_model::Manifest;
use hive_types::ManifestKey;
use tracing::info;

use crate::error::{OpsError, OpsResult};
use crate::hive::Hive;

/// Keys whose name starts with `name_prefix`, sorted.
pub fn list(hive: &Hive, name_prefix: &str) -> OpsResult<Vec<ManifestKey>> {
    Ok(hive.manifests().list_manifests(name_prefix)?)
}

/// Keys whose name is exactly `name`, sorted.
pub fn list_tags(hive: &Hive, name: &str) -> OpsResult<Vec<ManifestKey>> {
    Ok(list(hive, name)?
        .into_iter()
        .filter(|key| key.name() == name)
        .collect())
}

pub fn load(hive: &Hive, key: &ManifestKey) -> OpsResult<Manifest> {
    hive.manifests()
        .get_manifest(key)?
        .ok_or_else(|| OpsError::ManifestNotFound(key.clone()))
}

pub fn exists(hive: &Hive, key: &ManifestKey) -> OpsResult<bool> {
    Ok(hive.manifests().has_manifest(key)?)
}

/// Remove a manifest. Returns whether it existed. Objects it referenced stay
/// until the next prune.
pub fn delete(hive: &Hive, key: &ManifestKey) -> OpsResult<bool> {
    let _tx = hive.begin()?;
    let removed = hive.manifests().remove_manifest(key)?;
    if removed {
        hive.audit("manifest-delete", key.to_string())?;
        info!(%key, "deleted manifest");
    }
    Ok(removed)
}

/// Insert a prebuilt manifest after checking its root tree is stored.
pub fn insert(hive: &Hive, manifest: &Manifest) -> OpsResult<()> {
    let _tx = hive.begin()?;
    if !hive.objects().has_object(&manifest.root())? {
        return Err(OpsError::ObjectNotFound(manifest.root()));
    }
    hive.manifests().add_manifest(manifest)?;
    hive.audit("manifest-insert", manifest.key().to_string())?;
    Ok(())
}

/// Highest numeric tag of `name`.
pub fn max_id(hive: &Hive, name: &str) -> OpsResult<Option<u64>> {
    Ok(list_tags(hive, name)?
        .iter()
        .filter_map(ManifestKey::numeric_tag)
        .max())
}

/// The numeric tag after [`max_id`], starting at 1.
pub fn next_id(hive: &Hive, name: &str) -> OpsResult<u64> {
    Ok(max_id(hive, name)?.map_or(1, |max| max + 1))
}

/// `name` with the tag [`next_id`] would allocate.
pub fn next_key(hive: &Hive, name: &str) -> OpsResult<ManifestKey> {
    Ok(ManifestKey::new(name, next_id(hive, name)?.to_string())?)
}

/// Greatest tag of `name` in plain string order (`"9" > "10"`).
pub fn lexical_max_tag(hive: &Hive, name: &str) -> OpsResult<Option<String>> {
    Ok(list_tags(hive, name)?
        .into_iter()
        .map(|key| key.tag().to_string())
        .max())
}

/// Delete all but the `keep` highest numeric tags of `name`. Returns the
/// deleted keys in ascending tag order.
pub fn delete_old_by_id(hive: &Hive, name: &str, keep: usize) -> OpsResult<Vec<ManifestKey>> {
    let _tx = hive.begin()?;
    let mut numbered: Vec<(u64, ManifestKey)> = list_tags(hive, name)?
        .into_iter()
        .filter_map(|key| key.numeric_tag().map(|id| (id, key)))
        .collect();
    numbered.sort();
    let excess = numbered.len().saturating_sub(keep);

    let mut deleted = Vec::with_capacity(excess);
    for (_, key) in numbered.into_iter().take(excess) {
        if hive.manifests().remove_manifest(&key)? {
            deleted.push(key);
        }
    }
    if !deleted.is_empty() {
        hive.audit(
            "manifest-delete-old",
            format!("{name}: {} removed, {keep} kept", deleted.len()),
        )?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> ManifestKey {
        s.parse().unwrap()
    }

    fn hive_with(keys: &[&str]) -> Hive {
        let hive = Hive::in_memory();
        let root = hive.add_tree(&hive_model::Tree::empty()).unwrap();
        for k in keys {
            let manifest = Manifest::builder(key(k)).root(root).build().unwrap();
            insert(&hive, &manifest).unwrap();
        }
        hive
    }

    #[test]
    fn ids_ignore_other_names_and_text_tags() {
        let hive = hive_with(&["app:1", "app:9", "app:10", "app:latest", "apple:50"]);
        assert_eq!(max_id(&hive, "app").unwrap(), Some(10));
        assert_eq!(next_id(&hive, "app").unwrap(), 11);
        assert_eq!(next_key(&hive, "app").unwrap(), key("app:11"));
        assert_eq!(next_id(&hive, "new").unwrap(), 1);
        assert_eq!(max_id(&hive, "new").unwrap(), None);
    }

    #[test]
    fn lexical_max_is_string_order() {
        let hive = hive_with(&["app:9", "app:10", "app:beta"]);
        assert_eq!(lexical_max_tag(&hive, "app").unwrap().as_deref(), Some("beta"));
        let hive = hive_with(&["app:9", "app:10"]);
        assert_eq!(lexical_max_tag(&hive, "app").unwrap().as_deref(), Some("9"));
    }

    #[test]
    fn delete_old_keeps_newest() {
        let hive = hive_with(&["app:1", "app:2", "app:3", "app:10", "app:stable"]);
        let deleted = delete_old_by_id(&hive, "app", 2).unwrap();
        assert_eq!(deleted, vec![key("app:1"), key("app:2")]);
        assert_eq!(
            list_tags(&hive, "app").unwrap(),
            vec![key("app:10"), key("app:3"), key("app:stable")]
        );
        assert!(delete_old_by_id(&hive, "app", 5).unwrap().is_empty());
    }

    #[test]
    fn insert_requires_root() {
        let hive = Hive::in_memory();
        let ghost = hive_types::ObjectId::from_bytes(b"ghost");
        let manifest = Manifest::builder(key("app:1")).root(ghost).build().unwrap();
        assert!(matches!(
            insert(&hive, &manifest),
            Err(OpsError::ObjectNotFound(id)) if id == ghost
        ));
    }

    #[test]
    fn insert_twice_is_rejected() {
        let hive = hive_with(&["app:1"]);
        let manifest = load(&hive, &key("app:1")).unwrap();
        assert!(matches!(
            insert(&hive, &manifest),
            Err(OpsError::ManifestExists(_))
        ));
    }

    #[test]
    fn load_exists_delete() {
        let hive = hive_with(&["app:1"]);
        assert!(exists(&hive, &key("app:1")).unwrap());
        assert!(delete(&hive, &key("app:1")).unwrap());
        assert!(!delete(&hive, &key("app:1")).unwrap());
        assert!(matches!(
            load(&hive, &key("app:1")),
            Err(OpsError::ManifestNotFound(_))
        ));
    }
}
