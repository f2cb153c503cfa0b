//! Core data types shared across the save and refresh pipelines.

use serde::{Deserialize, Serialize};

/// MIME type the storage backend uses for folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// MIME type the storage backend uses for shortcuts (aliases).
pub const SHORTCUT_MIME: &str = "application/vnd.google-apps.shortcut";

/// One entry returned by the storage listing API.
///
/// A shortcut carries [`ShortcutDetails`] pointing at its real target; all
/// traversal must go through [`RemoteItem::effective_id`] so that shortcut
/// folders behave like the folders they point at.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut_details: Option<ShortcutDetails>,
}

/// Shortcut metadata: the aliased item and its MIME type.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortcutDetails {
    pub target_id: String,
    pub target_mime_type: String,
}

impl RemoteItem {
    /// Whether this item should be traversed as a folder: either it is a
    /// folder itself, or it is a shortcut whose target is a folder.
    pub fn is_folder_like(&self) -> bool {
        if self.mime_type == FOLDER_MIME {
            return true;
        }
        if self.mime_type != SHORTCUT_MIME {
            return false;
        }
        self.shortcut_details
            .as_ref()
            .is_some_and(|d| d.target_mime_type == FOLDER_MIME)
    }

    /// Identifier to use for traversal: the shortcut target when present,
    /// else the item's own id.
    pub fn effective_id(&self) -> &str {
        self.shortcut_details
            .as_ref()
            .map(|d| d.target_id.as_str())
            .unwrap_or(&self.id)
    }
}

/// A candidate destination folder advertised by the active-subfolders
/// configuration source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSubfolder {
    pub topic: String,
    pub folder_id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A canonical issuer: a master label plus alias strings that resolve to it.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct IssuerCanonEntry {
    pub master: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// One captured page, as received from the upload form.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    /// Original filename from the client (informational only; persisted
    /// names are derived from the set name).
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Result of persisting a document bundle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    pub set_name: String,
    pub folder_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}
