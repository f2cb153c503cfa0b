//! Cloud storage REST client.
//!
//! Talks to the Drive v3 surface: cursor-paginated child listing, content
//! download by id, and create-or-update via multipart upload (a JSON
//! metadata part plus a binary content part in one `multipart/related`
//! request — `POST` to create under a parent, `PATCH` to update in place).
//!
//! Every request carries the caller's bearer token; the token is
//! request-scoped and never refreshed here. Any non-success response aborts
//! the operation with an error carrying the HTTP status and a truncated
//! response body. No partial-page retry: a transient failure on page K
//! restarts the whole listing.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::models::RemoteItem;

const DRIVE_LIST_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Fixed page size for listing requests; the backend caps at 1000.
const PAGE_SIZE: u32 = 1000;

/// Identity of an uploaded object, as echoed by the upload endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub id: String,
    pub name: String,
}

/// One page of a listing response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<RemoteItem>,
}

/// Authenticated client for the storage backend.
pub struct DriveClient {
    client: reqwest::Client,
    token: String,
}

impl DriveClient {
    /// Build a client from a bearer token. Fails fast on an empty token so
    /// no network call is attempted without credentials.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            bail!("Missing storage access token");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            token,
        })
    }

    /// List all non-trashed children of a folder, following the
    /// continuation cursor until the backend reports none remaining.
    pub async fn list_children(&self, parent_folder_id: &str) -> Result<Vec<RemoteItem>> {
        let query = format!(
            "'{}' in parents and trashed = false",
            escape_query_value(parent_folder_id)
        );
        self.list_by_query(&query).await
    }

    /// Find the single non-trashed child of a folder with an exact name.
    /// At most one is expected; extras are ignored.
    pub async fn find_child_by_name(
        &self,
        parent_folder_id: &str,
        name: &str,
    ) -> Result<Option<RemoteItem>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query_value(name),
            escape_query_value(parent_folder_id)
        );
        let mut items = self.list_by_query(&query).await?;
        Ok(if items.is_empty() {
            None
        } else {
            Some(items.swap_remove(0))
        })
    }

    async fn list_by_query(&self, query: &str) -> Result<Vec<RemoteItem>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(DRIVE_LIST_URL)
                .bearer_auth(&self.token)
                .query(&[
                    ("q", query),
                    (
                        "fields",
                        "nextPageToken,files(id,name,mimeType,shortcutDetails(targetId,targetMimeType))",
                    ),
                    ("pageSize", &PAGE_SIZE.to_string()),
                    ("supportsAllDrives", "true"),
                    ("includeItemsFromAllDrives", "true"),
                ]);
            if let Some(ref token) = page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let resp = request
                .send()
                .await
                .with_context(|| format!("Storage list request failed for query: {}", query))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                bail!(
                    "Storage list failed (HTTP {}): {}",
                    status,
                    body.chars().take(500).collect::<String>()
                );
            }

            let page: ListPage = resp.json().await?;
            items.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(items)
    }

    /// Download an object's content as text.
    pub async fn download_text(&self, file_id: &str) -> Result<String> {
        let url = format!("{}/{}", DRIVE_LIST_URL, file_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
            .send()
            .await
            .with_context(|| format!("Storage download failed for {}", file_id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Storage read failed for {} (HTTP {}): {}",
                file_id,
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(resp.text().await?)
    }

    /// Create a new object under a parent folder via multipart upload.
    pub async fn create_file(
        &self,
        parent_folder_id: &str,
        name: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<UploadedFile> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_folder_id],
        });
        self.upload_multipart(None, &metadata, content, content_type)
            .await
    }

    /// Replace an existing object's content (and name metadata) in place.
    pub async fn update_file(
        &self,
        file_id: &str,
        name: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<UploadedFile> {
        let metadata = serde_json::json!({ "name": name });
        self.upload_multipart(Some(file_id), &metadata, content, content_type)
            .await
    }

    /// Overwrite an object's content only, via a media upload. Used for the
    /// canonical table, whose metadata never changes.
    pub async fn update_media(
        &self,
        file_id: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<()> {
        let url = format!("{}/{}", DRIVE_UPLOAD_URL, file_id);
        let resp = self
            .client
            .patch(&url)
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media")])
            .header("Content-Type", content_type)
            .body(content.to_vec())
            .send()
            .await
            .with_context(|| format!("Storage media update failed for {}", file_id))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Storage media update failed for {} (HTTP {}): {}",
                file_id,
                status,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }

    async fn upload_multipart(
        &self,
        existing_id: Option<&str>,
        metadata: &serde_json::Value,
        content: &[u8],
        content_type: &str,
    ) -> Result<UploadedFile> {
        let boundary = format!("docvault-{}", uuid::Uuid::new_v4());
        let body = build_multipart_body(&boundary, metadata, content, content_type);

        let builder = match existing_id {
            Some(id) => self.client.patch(format!("{}/{}", DRIVE_UPLOAD_URL, id)),
            None => self.client.post(DRIVE_UPLOAD_URL),
        };

        let resp = builder
            .bearer_auth(&self.token)
            .query(&[("uploadType", "multipart"), ("fields", "id,name")])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body)
            .send()
            .await
            .context("Storage upload request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Storage upload failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        Ok(resp.json().await?)
    }
}

/// Assemble a `multipart/related` body: a JSON metadata part followed by
/// the binary content part, closed with the terminal boundary.
fn build_multipart_body(
    boundary: &str,
    metadata: &serde_json::Value,
    content: &[u8],
    content_type: &str,
) -> Vec<u8> {
    let delimiter = format!("\r\n--{}\r\n", boundary);
    let close_delimiter = format!("\r\n--{}--", boundary);

    let content_type = if content_type.is_empty() {
        "application/octet-stream"
    } else {
        content_type
    };

    let mut body = Vec::new();
    body.extend_from_slice(delimiter.as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(delimiter.as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(close_delimiter.as_bytes());
    body
}

/// Escape a value for interpolation into a listing query string.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_rejected() {
        assert!(DriveClient::new("").is_err());
        assert!(DriveClient::new("   ").is_err());
        assert!(DriveClient::new("tok").is_ok());
    }

    #[test]
    fn test_multipart_body_layout() {
        let metadata = serde_json::json!({ "name": "manifest.json" });
        let body = build_multipart_body("B", &metadata, b"{}", "application/json");
        let text = String::from_utf8(body).unwrap();

        assert!(text.starts_with("\r\n--B\r\n"));
        assert!(text.contains("Content-Type: application/json; charset=UTF-8\r\n\r\n{\"name\":\"manifest.json\"}"));
        assert!(text.contains("Content-Type: application/json\r\n\r\n{}"));
        assert!(text.ends_with("\r\n--B--"));
    }

    #[test]
    fn test_multipart_body_defaults_content_type() {
        let metadata = serde_json::json!({ "name": "page.bin" });
        let body = build_multipart_body("B", &metadata, b"x", "");
        let text = String::from_utf8(body).unwrap();
        assert!(text.contains("Content-Type: application/octet-stream"));
    }

    #[test]
    fn test_query_escaping() {
        assert_eq!(escape_query_value("plain"), "plain");
        assert_eq!(escape_query_value("o'brien"), "o\\'brien");
        assert_eq!(escape_query_value("a\\b"), "a\\\\b");
    }
}
