//! Per-folder manifest index: model, merge protocol, and the store that
//! reconciles it with the copy persisted in the target folder.
//!
//! A manifest is one JSON object named `manifest.json` inside the folder it
//! describes. It carries four co-indexed mappings plus a timestamp:
//!
//! - `folders` — folder-path key (e.g. `"docs/<name>"`) to folder id
//! - `tree` — folder-path key to the set of item ids in that folder
//! - `files` — item id to `{name, mimeType}` metadata
//! - `inlineAssets` — document id to a map of relative asset reference
//!   (`"./image.png"`) to the asset's item id
//!
//! # Merge semantics
//!
//! Replace mode (or no prior manifest): the incoming manifest wins whole.
//! Merge mode: `folders`, `files`, and `inlineAssets` are shallow-merged
//! with incoming values winning per key; `tree` is merged per key as a set
//! union, so a folder's item set only grows across incremental refreshes;
//! `updatedAt` takes the incoming value.
//!
//! # Concurrency
//!
//! The whole read-merge-write cycle runs under a per-folder async lock held
//! by [`ManifestStore`], closing the lost-update race between two
//! concurrent upserts into the same folder. Writers in different folders
//! do not contend.
//!
//! # Corrupt vs absent
//!
//! A stored manifest that fails to parse is *not* treated as absent. In
//! merge mode the upsert refuses to overwrite it (the prior index would be
//! silently discarded); a replace-mode upsert — the refresh path — is the
//! recovery tool and overwrites the corrupt object in place.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::drive::DriveClient;

/// Conventional name of the manifest object inside its folder.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Metadata recorded for one item in the manifest's `files` map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub mime_type: String,
}

/// The persisted per-folder index.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Manifest {
    pub folders: BTreeMap<String, String>,
    pub tree: BTreeMap<String, BTreeSet<String>>,
    pub files: BTreeMap<String, FileMeta>,
    pub inline_assets: BTreeMap<String, BTreeMap<String, String>>,
    pub updated_at: i64,
}

/// Merge an incoming partial manifest over an existing one.
///
/// With `replace` set, or with no existing manifest, the incoming manifest
/// is returned unchanged.
pub fn merge_manifest(existing: Option<Manifest>, incoming: Manifest, replace: bool) -> Manifest {
    let Some(existing) = existing else {
        return incoming;
    };
    if replace {
        return incoming;
    }

    let mut folders = existing.folders;
    folders.extend(incoming.folders);

    let mut tree = existing.tree;
    for (key, ids) in incoming.tree {
        tree.entry(key).or_default().extend(ids);
    }

    let mut files = existing.files;
    files.extend(incoming.files);

    // A document's whole asset map is replaced, not deep-merged: the
    // incoming save recomputed it from scratch.
    let mut inline_assets = existing.inline_assets;
    inline_assets.extend(incoming.inline_assets);

    Manifest {
        folders,
        tree,
        files,
        inline_assets,
        updated_at: incoming.updated_at,
    }
}

// ============ Store ============

/// Which write the upsert performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Created,
    Updated,
}

impl std::fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpsertAction::Created => write!(f, "created"),
            UpsertAction::Updated => write!(f, "updated"),
        }
    }
}

/// Outcome of an upsert: what happened and the manifest object's id.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    pub action: UpsertAction,
    pub id: String,
}

/// What the store found when it looked for a prior manifest.
#[derive(Debug)]
enum Existing {
    Absent,
    Present { id: String, manifest: Manifest },
    Corrupt { id: String },
}

/// Pick the merge base and the object id to write to.
///
/// Errors on a corrupt prior manifest in merge mode; a replace-mode write
/// overwrites it (refresh is the recovery path for corruption).
fn merge_base(existing: Existing, replace: bool) -> Result<(Option<Manifest>, Option<String>)> {
    match existing {
        Existing::Absent => Ok((None, None)),
        Existing::Present { id, manifest } => Ok((Some(manifest), Some(id))),
        Existing::Corrupt { id } if replace => Ok((None, Some(id))),
        Existing::Corrupt { id } => bail!(
            "Existing manifest {} is corrupt; refusing to merge over it. \
             Run a manifest refresh to rebuild it.",
            id
        ),
    }
}

/// Owns the read-merge-write cycle for every folder manifest.
///
/// One instance lives in the server state; the per-folder locks inside it
/// serialize concurrent upserts into the same folder.
#[derive(Default)]
pub struct ManifestStore {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ManifestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, merge, and write back the manifest for one folder.
    pub async fn upsert(
        &self,
        drive: &DriveClient,
        folder_id: &str,
        incoming: Manifest,
        replace: bool,
    ) -> Result<UpsertResult> {
        let lock = self.folder_lock(folder_id);
        let _guard = lock.lock().await;

        let existing = self.read_existing(drive, folder_id).await?;
        let (base, existing_id) = merge_base(existing, replace)?;
        let merged = merge_manifest(base, incoming, replace);

        let body = serde_json::to_vec_pretty(&merged)?;
        let uploaded = match existing_id {
            Some(ref id) => {
                drive
                    .update_file(id, MANIFEST_NAME, &body, "application/json")
                    .await?
            }
            None => {
                drive
                    .create_file(folder_id, MANIFEST_NAME, &body, "application/json")
                    .await?
            }
        };

        Ok(UpsertResult {
            action: if existing_id.is_some() {
                UpsertAction::Updated
            } else {
                UpsertAction::Created
            },
            id: uploaded.id,
        })
    }

    async fn read_existing(&self, drive: &DriveClient, folder_id: &str) -> Result<Existing> {
        let Some(item) = drive.find_child_by_name(folder_id, MANIFEST_NAME).await? else {
            return Ok(Existing::Absent);
        };

        let text = drive.download_text(&item.id).await?;
        match serde_json::from_str::<Manifest>(&text) {
            Ok(manifest) => Ok(Existing::Present {
                id: item.id,
                manifest,
            }),
            Err(e) => {
                eprintln!(
                    "Warning: manifest {} in folder {} failed to parse: {}",
                    item.id, folder_id, e
                );
                Ok(Existing::Corrupt { id: item.id })
            }
        }
    }

    fn folder_lock(&self, folder_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(folder_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn meta(name: &str, mime: &str) -> FileMeta {
        FileMeta {
            name: name.to_string(),
            mime_type: mime.to_string(),
        }
    }

    fn manifest_with_tree(key: &str, items: &[&str], updated_at: i64) -> Manifest {
        let mut m = Manifest {
            updated_at,
            ..Default::default()
        };
        m.folders.insert(key.to_string(), "folder-1".to_string());
        m.tree.insert(key.to_string(), ids(items));
        for id in items {
            m.files.insert(id.to_string(), meta(id, "image/png"));
        }
        m
    }

    #[test]
    fn test_merge_without_existing_returns_incoming() {
        let incoming = manifest_with_tree("docs/a", &["x"], 10);
        let merged = merge_manifest(None, incoming.clone(), false);
        assert_eq!(merged, incoming);
    }

    #[test]
    fn test_replace_discards_existing() {
        let existing = manifest_with_tree("docs/a", &["x", "y"], 1);
        let incoming = manifest_with_tree("docs/b", &["z"], 2);
        let merged = merge_manifest(Some(existing), incoming.clone(), true);
        assert_eq!(merged, incoming);
    }

    #[test]
    fn test_tree_merges_as_set_union() {
        // Refresh 1 observes {a, b}; refresh 2 observes {b, c}. The final
        // tree entry must contain exactly {a, b, c}.
        let first = manifest_with_tree("docs/topic", &["a", "b"], 1);
        let second = manifest_with_tree("docs/topic", &["b", "c"], 2);
        let merged = merge_manifest(Some(first), second, false);
        assert_eq!(merged.tree["docs/topic"], ids(&["a", "b", "c"]));
        assert_eq!(merged.updated_at, 2);
    }

    #[test]
    fn test_files_shallow_merge_incoming_wins() {
        let mut existing = Manifest::default();
        existing.files.insert("f1".to_string(), meta("old.png", "image/png"));
        existing.files.insert("f2".to_string(), meta("keep.png", "image/png"));

        let mut incoming = Manifest::default();
        incoming
            .files
            .insert("f1".to_string(), meta("new.png", "image/jpeg"));
        incoming.files.insert("f3".to_string(), meta("add.png", "image/png"));

        let merged = merge_manifest(Some(existing), incoming, false);
        assert_eq!(merged.files["f1"], meta("new.png", "image/jpeg"));
        assert_eq!(merged.files["f2"], meta("keep.png", "image/png"));
        assert_eq!(merged.files["f3"], meta("add.png", "image/png"));
    }

    #[test]
    fn test_inline_assets_replace_per_document() {
        let mut existing = Manifest::default();
        existing.inline_assets.insert(
            "doc1".to_string(),
            BTreeMap::from([("./old.png".to_string(), "f-old".to_string())]),
        );

        let mut incoming = Manifest::default();
        incoming.inline_assets.insert(
            "doc1".to_string(),
            BTreeMap::from([("./new.png".to_string(), "f-new".to_string())]),
        );

        let merged = merge_manifest(Some(existing), incoming, false);
        // The document's whole asset map is replaced, not deep-merged.
        assert_eq!(merged.inline_assets["doc1"].len(), 1);
        assert_eq!(merged.inline_assets["doc1"]["./new.png"], "f-new");
    }

    #[test]
    fn test_folders_merge_incoming_wins_on_collision() {
        let mut existing = Manifest::default();
        existing
            .folders
            .insert("docs/a".to_string(), "old-id".to_string());

        let mut incoming = Manifest::default();
        incoming
            .folders
            .insert("docs/a".to_string(), "new-id".to_string());

        let merged = merge_manifest(Some(existing), incoming, false);
        assert_eq!(merged.folders["docs/a"], "new-id");
    }

    #[test]
    fn test_serde_round_trip_structural_equality() {
        let mut m = manifest_with_tree("docs/topic", &["b", "a", "c"], 42);
        m.inline_assets.insert(
            "doc1".to_string(),
            BTreeMap::from([
                ("./p1.png".to_string(), "a".to_string()),
                ("./p2.png".to_string(), "b".to_string()),
            ]),
        );

        let json = serde_json::to_string_pretty(&m).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_parses_camel_case_wire_form() {
        let json = r#"{
            "folders": {"docs/topic": "fid"},
            "tree": {"docs/topic": ["a", "a", "b"]},
            "files": {"a": {"name": "x.png", "mimeType": "image/png"}},
            "inlineAssets": {"a": {"./x.png": "a"}},
            "updatedAt": 7
        }"#;
        let m: Manifest = serde_json::from_str(json).unwrap();
        // Duplicate ids in the wire form collapse into the set.
        assert_eq!(m.tree["docs/topic"], ids(&["a", "b"]));
        assert_eq!(m.files["a"].mime_type, "image/png");
        assert_eq!(m.updated_at, 7);
    }

    #[test]
    fn test_missing_fields_default() {
        let m: Manifest = serde_json::from_str("{}").unwrap();
        assert!(m.folders.is_empty());
        assert_eq!(m.updated_at, 0);
    }

    #[test]
    fn test_merge_base_corrupt_refuses_merge_mode() {
        let err = merge_base(
            Existing::Corrupt {
                id: "m-1".to_string(),
            },
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("corrupt"));
    }

    #[test]
    fn test_merge_base_corrupt_allows_replace_mode() {
        let (base, id) = merge_base(
            Existing::Corrupt {
                id: "m-1".to_string(),
            },
            true,
        )
        .unwrap();
        assert!(base.is_none());
        assert_eq!(id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_merge_base_absent_and_present() {
        let (base, id) = merge_base(Existing::Absent, false).unwrap();
        assert!(base.is_none() && id.is_none());

        let m = manifest_with_tree("docs/a", &["x"], 1);
        let (base, id) = merge_base(
            Existing::Present {
                id: "m-2".to_string(),
                manifest: m.clone(),
            },
            false,
        )
        .unwrap();
        assert_eq!(base, Some(m));
        assert_eq!(id.as_deref(), Some("m-2"));
    }
}
