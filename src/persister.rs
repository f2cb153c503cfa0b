//! Bundle persistence: turn captured pages plus an edited summary into a
//! named set of files in the resolved destination folder, then fold the
//! result into that folder's manifest.
//!
//! Ordering within one save is fixed: derive the set name, resolve the
//! folder, upload every file, then upsert the manifest — the manifest
//! entries need the identifiers the uploads produce. Image filenames are
//! indexed by position in the input sequence, not by content hash, so
//! re-saving the same pages produces new files rather than deduplicating.

use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};

use crate::canon::apply_canon_to_summary;
use crate::completion::CompletionBackend;
use crate::config::Config;
use crate::drive::{DriveClient, UploadedFile};
use crate::manifest::{FileMeta, Manifest, ManifestStore};
use crate::models::{CapturedImage, IssuerCanonEntry, SaveOutcome};
use crate::resolver::{derive_set_name, resolve_folder};
use crate::slug::{extension_for_mime, normalize_filename};
use crate::sources::SourceCache;

/// Folder-path key used when resolution produced no topic.
const DEFAULT_FOLDER_KEY: &str = "Docs";

/// An in-flight document bundle, as received from the upload form.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub images: Vec<CapturedImage>,
    pub edited_summary: String,
    pub selected_canon: Option<IssuerCanonEntry>,
}

/// Persist a document bundle end to end.
pub async fn save_bundle(
    drive: &DriveClient,
    store: &ManifestStore,
    backend: &dyn CompletionBackend,
    cache: &SourceCache,
    config: &Config,
    bundle: BundleRequest,
) -> Result<SaveOutcome> {
    let summary = bundle.edited_summary.trim().to_string();
    if summary.is_empty() || bundle.images.is_empty() {
        bail!("Summary and files are required");
    }

    let summary = match &bundle.selected_canon {
        Some(entry) => apply_canon_to_summary(&summary, entry),
        None => summary,
    };

    let set_name = derive_set_name(
        backend,
        cache,
        config,
        &summary,
        Utc::now().date_naive(),
    )
    .await;
    if let crate::resolver::Resolution::Defaulted { reason, .. } = &set_name {
        eprintln!("Warning: set name defaulted: {}", reason);
    }
    let set_name = normalize_filename(set_name.value());

    let choice = resolve_folder(backend, cache, config, &summary).await;
    if let crate::resolver::Resolution::Defaulted { reason, .. } = &choice {
        eprintln!("Warning: folder resolution defaulted: {}", reason);
    }
    let choice = choice.into_value();

    let summary_name = summary_file_name(&set_name);
    let image_names: Vec<String> = bundle
        .images
        .iter()
        .enumerate()
        .map(|(index, image)| image_file_name(&set_name, index, &image.mime_type))
        .collect();

    let markdown = build_markdown(&set_name, &summary, &image_names);

    // Uploads happen before the manifest upsert; the tree and asset maps
    // need the ids the backend assigns here.
    let mut image_uploads: Vec<(UploadedFile, String)> = Vec::with_capacity(bundle.images.len());
    for (image, name) in bundle.images.iter().zip(&image_names) {
        let uploaded = drive
            .create_file(&choice.folder_id, name, &image.bytes, &image.mime_type)
            .await?;
        image_uploads.push((uploaded, image.mime_type.clone()));
    }
    let summary_upload = drive
        .create_file(
            &choice.folder_id,
            &summary_name,
            markdown.as_bytes(),
            "text/markdown",
        )
        .await?;

    let incoming = build_bundle_manifest(
        choice.topic.as_deref(),
        &choice.folder_id,
        &summary_upload,
        &image_uploads,
        Utc::now().timestamp_millis(),
    );

    store
        .upsert(drive, &choice.folder_id, incoming, false)
        .await?;

    Ok(SaveOutcome {
        set_name,
        folder_id: choice.folder_id,
        topic: choice.topic,
    })
}

/// `<setName>.mdx`
fn summary_file_name(set_name: &str) -> String {
    format!("{}.mdx", set_name)
}

/// `<setName>-p<index+1>.<ext>` — 1-based page index, extension from the
/// image's content type.
fn image_file_name(set_name: &str, index: usize, mime_type: &str) -> String {
    format!(
        "{}-p{}.{}",
        set_name,
        index + 1,
        extension_for_mime(mime_type)
    )
}

/// Render the persisted summary document: title, summary section, and a
/// support section with a relative link per page image. Those relative
/// links are exactly the keys of the manifest's inline-asset map.
fn build_markdown(set_name: &str, summary: &str, image_names: &[String]) -> String {
    let images: Vec<String> = image_names
        .iter()
        .map(|name| format!("![{}](./{})", name, name))
        .collect();

    format!(
        "# {}\n\n## summary\n\n{}\n\n---\n\n## support\n\n{}\n",
        set_name,
        summary.trim(),
        images.join("\n\n")
    )
}

/// Build the partial manifest contributed by one saved bundle.
fn build_bundle_manifest(
    topic: Option<&str>,
    folder_id: &str,
    summary_upload: &UploadedFile,
    image_uploads: &[(UploadedFile, String)],
    updated_at: i64,
) -> Manifest {
    let folder_key = topic.unwrap_or(DEFAULT_FOLDER_KEY).to_string();

    let mut manifest = Manifest {
        updated_at,
        ..Default::default()
    };
    manifest
        .folders
        .insert(folder_key.clone(), folder_id.to_string());

    let mut tree_ids: BTreeSet<String> = BTreeSet::new();
    tree_ids.insert(summary_upload.id.clone());

    manifest.files.insert(
        summary_upload.id.clone(),
        FileMeta {
            name: summary_upload.name.clone(),
            mime_type: "text/markdown".to_string(),
        },
    );

    let mut assets: BTreeMap<String, String> = BTreeMap::new();
    for (uploaded, mime_type) in image_uploads {
        tree_ids.insert(uploaded.id.clone());
        manifest.files.insert(
            uploaded.id.clone(),
            FileMeta {
                name: uploaded.name.clone(),
                mime_type: mime_type.clone(),
            },
        );
        assets.insert(format!("./{}", uploaded.name), uploaded.id.clone());
    }

    manifest.tree.insert(folder_key, tree_ids);
    manifest
        .inline_assets
        .insert(summary_upload.id.clone(), assets);
    manifest
}
