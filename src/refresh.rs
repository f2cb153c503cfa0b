//! Full folder-tree manifest refresh.
//!
//! Walks the monitored root: locates the `docs` folder (shortcut-resolved,
//! falling back to the root itself), lists each of its subfolders, and
//! rebuilds every subfolder's manifest from the observed listing using
//! replace semantics. Replace mode makes refresh the recovery path for a
//! corrupt manifest.
//!
//! Progress is accumulated into the returned messages alongside the
//! operational log, mirroring what the endpoint reports to the caller.

use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;

use crate::config::Config;
use crate::drive::DriveClient;
use crate::manifest::{FileMeta, Manifest, ManifestStore};
use crate::models::RemoteItem;

/// What a refresh run touched.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub processed_files: Vec<String>,
    pub messages: Vec<String>,
}

/// Refresh the manifest of every subfolder under the docs root.
pub async fn refresh_manifests(
    drive: &DriveClient,
    store: &ManifestStore,
    config: &Config,
) -> Result<RefreshOutcome> {
    let mut messages = vec!["starting manifest refresh".to_string()];
    let mut processed_files = Vec::new();

    let root_items = drive.list_children(&config.drive.root_folder_id).await?;
    let docs_folder = find_docs_folder(&root_items);

    let target_folder_id = match docs_folder {
        Some(folder) => {
            messages.push(format!("using docs folder {}", folder.name));
            folder.effective_id().to_string()
        }
        None => config.drive.root_folder_id.clone(),
    };

    let target_items = drive.list_children(&target_folder_id).await?;
    let subfolders: Vec<&RemoteItem> = target_items
        .iter()
        .filter(|item| item.is_folder_like())
        .collect();
    messages.push(format!("found {} subfolder(s)", subfolders.len()));

    for folder in subfolders {
        let effective_id = folder.effective_id().to_string();
        messages.push(format!("processing folder {}", folder.name));

        let files = drive.list_children(&effective_id).await?;
        processed_files.extend(files.iter().map(|f| f.name.clone()));

        let manifest = build_folder_manifest(
            &folder.name,
            &effective_id,
            &files,
            Utc::now().timestamp_millis(),
        );

        let result = store.upsert(drive, &effective_id, manifest, true).await?;
        messages.push(format!(
            "{} manifest.json for {} ({})",
            result.action, folder.name, result.id
        ));
    }

    messages.push("manifest refresh complete".to_string());
    Ok(RefreshOutcome {
        processed_files,
        messages,
    })
}

/// Locate the folder literally named `docs` among the root items
/// (case-insensitive, surrounding whitespace ignored).
fn find_docs_folder(root_items: &[RemoteItem]) -> Option<&RemoteItem> {
    root_items
        .iter()
        .filter(|item| item.is_folder_like())
        .find(|item| item.name.trim().eq_ignore_ascii_case("docs"))
}

/// Rebuild one folder's manifest from an observed listing.
///
/// The tree records every listed item; inline assets map each markdown
/// document to all image files in the same folder, keyed by relative
/// reference.
fn build_folder_manifest(
    folder_name: &str,
    folder_id: &str,
    files: &[RemoteItem],
    updated_at: i64,
) -> Manifest {
    let folder_key = format!("docs/{}", folder_name);

    let mut manifest = Manifest {
        updated_at,
        ..Default::default()
    };
    manifest
        .folders
        .insert(folder_key.clone(), folder_id.to_string());
    manifest.tree.insert(
        folder_key,
        files.iter().map(|f| f.id.clone()).collect(),
    );
    for file in files {
        manifest.files.insert(
            file.id.clone(),
            FileMeta {
                name: file.name.clone(),
                mime_type: file.mime_type.clone(),
            },
        );
    }

    let image_files: Vec<&RemoteItem> = files
        .iter()
        .filter(|f| f.mime_type.starts_with("image/"))
        .collect();

    for doc in files.iter().filter(|f| is_markdown_name(&f.name)) {
        let assets: BTreeMap<String, String> = image_files
            .iter()
            .map(|img| (format!("./{}", img.name), img.id.clone()))
            .collect();
        manifest.inline_assets.insert(doc.id.clone(), assets);
    }

    manifest
}

fn is_markdown_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".md") || lower.ends_with(".mdx")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ShortcutDetails, FOLDER_MIME, SHORTCUT_MIME};

    fn item(id: &str, name: &str, mime: &str) -> RemoteItem {
        RemoteItem {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime.to_string(),
            shortcut_details: None,
        }
    }

    #[test]
    fn test_find_docs_folder_ignores_case_and_whitespace() {
        let items = vec![
            item("f-1", "Archive", FOLDER_MIME),
            item("f-2", "  DOCS ", FOLDER_MIME),
        ];
        assert_eq!(find_docs_folder(&items).unwrap().id, "f-2");
    }

    #[test]
    fn test_find_docs_folder_resolves_shortcut() {
        let mut shortcut = item("f-1", "docs", SHORTCUT_MIME);
        shortcut.shortcut_details = Some(ShortcutDetails {
            target_id: "target-7".to_string(),
            target_mime_type: FOLDER_MIME.to_string(),
        });
        let items = vec![shortcut];
        let found = find_docs_folder(&items).unwrap();
        assert_eq!(found.effective_id(), "target-7");
    }

    #[test]
    fn test_find_docs_folder_skips_non_folders() {
        let items = vec![item("f-1", "docs", "text/plain")];
        assert!(find_docs_folder(&items).is_none());
    }

    #[test]
    fn test_folder_manifest_tree_and_files() {
        let files = vec![
            item("a", "set-1.mdx", "text/markdown"),
            item("b", "set-1-p1.png", "image/png"),
            item("c", "manifest.json", "application/json"),
        ];
        let m = build_folder_manifest("Invoices", "f-9", &files, 5);

        assert_eq!(m.folders["docs/Invoices"], "f-9");
        assert_eq!(m.tree["docs/Invoices"].len(), 3);
        for id in ["a", "b", "c"] {
            assert!(m.tree["docs/Invoices"].contains(id));
            assert!(m.files.contains_key(id));
        }
        assert_eq!(m.updated_at, 5);
    }

    #[test]
    fn test_folder_manifest_inline_assets_per_markdown_doc() {
        let files = vec![
            item("a", "set-1.mdx", "text/markdown"),
            item("b", "Notes.MD", "text/markdown"),
            item("c", "set-1-p1.png", "image/png"),
            item("d", "report.pdf", "application/pdf"),
        ];
        let m = build_folder_manifest("Invoices", "f-9", &files, 5);

        assert_eq!(m.inline_assets.len(), 2);
        for doc_id in ["a", "b"] {
            let assets = &m.inline_assets[doc_id];
            assert_eq!(assets.len(), 1);
            assert_eq!(assets["./set-1-p1.png"], "c");
        }
        assert!(!m.inline_assets.contains_key("d"));
    }
}
