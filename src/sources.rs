//! Remote-hosted configuration sources.
//!
//! Prompt templates and the active destination-folder list live in remote
//! JSON documents. They are fetched through an explicit [`SourceCache`]
//! owned by the server state (no process-global statics): TTL-based, with
//! an injected clock for tests and a manual invalidation operation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::ActiveSubfolder;

/// A prompt template fetched from a configuration source.
///
/// `user` may contain `{{placeholder}}` markers filled in by
/// [`substitute`].
#[derive(Debug, Clone, Deserialize)]
pub struct PromptTemplate {
    pub system: String,
    pub user: String,
    #[serde(default, rename = "wordTarget")]
    pub word_target: Option<u32>,
}

impl PromptTemplate {
    /// Built-in template used when the summarization prompt source cannot
    /// be fetched or parsed. Keeps the summarize operation available even
    /// when the configuration host is down.
    pub fn summarize_fallback() -> Self {
        Self {
            system: "You are a document reader.".to_string(),
            user: "Summarize these documents in about {{wordTarget}} words.".to_string(),
            word_target: Some(100),
        }
    }
}

/// Response shape of the active-subfolders configuration source.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSubfolderList {
    #[serde(default)]
    pub subfolders: Vec<ActiveSubfolder>,
    #[serde(default)]
    pub fallback_folder_id: Option<String>,
}

/// Fill `{{key}}` markers in a template. Marker names are matched
/// case-insensitively and may carry internal whitespace (`{{ wordTarget }}`).
/// Unknown markers are left in place.
pub fn substitute(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                let replacement = vars
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(key))
                    .map(|(_, value)| *value);
                match replacement {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

// ============ Source cache ============

/// Clock used by [`SourceCache`]; swapped out in tests.
pub type Clock = fn() -> Instant;

struct CacheEntry {
    fetched_at: Instant,
    body: String,
}

/// In-process cache of fetched configuration documents.
///
/// One instance lives in the server state and is passed by reference to the
/// components that need it. Entries expire after the configured TTL and can
/// be dropped manually with [`SourceCache::invalidate`] /
/// [`SourceCache::invalidate_all`].
pub struct SourceCache {
    ttl: Duration,
    clock: Clock,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl SourceCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Instant::now)
    }

    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a document's raw text, serving from cache when fresh.
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        if let Some(body) = self.cached(url) {
            return Ok(body);
        }

        let resp = reqwest::get(url)
            .await
            .with_context(|| format!("Failed to fetch configuration source: {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "Configuration source {} returned HTTP {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            );
        }

        let body = resp.text().await?;
        self.store(url, body.clone());
        Ok(body)
    }

    /// Fetch and deserialize a JSON document.
    pub async fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.fetch_text(url).await?;
        serde_json::from_str(&body)
            .with_context(|| format!("Configuration source {} is not valid JSON", url))
    }

    /// Fetch a prompt template, requiring both `system` and `user` fields.
    pub async fn fetch_prompts(&self, url: &str) -> Result<PromptTemplate> {
        let template: PromptTemplate = self.fetch_json(url).await?;
        if template.system.trim().is_empty() || template.user.trim().is_empty() {
            bail!("Prompt source {} is missing system or user fields", url);
        }
        Ok(template)
    }

    /// Drop one cached document.
    pub fn invalidate(&self, url: &str) {
        self.entries.lock().unwrap().remove(url);
    }

    /// Drop every cached document.
    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
    }

    fn cached(&self, url: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(url)?;
        if (self.clock)().duration_since(entry.fetched_at) < self.ttl {
            Some(entry.body.clone())
        } else {
            None
        }
    }

    fn store(&self, url: &str, body: String) {
        self.entries.lock().unwrap().insert(
            url.to_string(),
            CacheEntry {
                fetched_at: (self.clock)(),
                body,
            },
        );
    }

    #[cfg(test)]
    fn insert_for_test(&self, url: &str, body: &str) {
        self.store(url, body.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute_basic() {
        let out = substitute("about {{wordTarget}} words", &[("wordTarget", "150")]);
        assert_eq!(out, "about 150 words");
    }

    #[test]
    fn test_substitute_whitespace_and_case() {
        let out = substitute("{{ WORDTARGET }} / {{summary}}", &[
            ("wordTarget", "99"),
            ("summary", "an invoice"),
        ]);
        assert_eq!(out, "99 / an invoice");
    }

    #[test]
    fn test_substitute_unknown_marker_left_in_place() {
        let out = substitute("keep {{unknown}} marker", &[("wordTarget", "1")]);
        assert_eq!(out, "keep {{unknown}} marker");
    }

    #[test]
    fn test_substitute_unterminated_marker() {
        let out = substitute("broken {{marker", &[("marker", "x")]);
        assert_eq!(out, "broken {{marker");
    }

    #[tokio::test]
    async fn test_cache_serves_fresh_entries_without_network() {
        let cache = SourceCache::new(Duration::from_secs(60));
        cache.insert_for_test("https://example.invalid/p.json", r#"{"system":"s","user":"u"}"#);
        let template = cache
            .fetch_prompts("https://example.invalid/p.json")
            .await
            .unwrap();
        assert_eq!(template.system, "s");
        assert_eq!(template.user, "u");
        assert_eq!(template.word_target, None);
    }

    #[tokio::test]
    async fn test_invalidate_drops_entry() {
        let cache = SourceCache::new(Duration::from_secs(60));
        cache.insert_for_test("https://example.invalid/p.json", "{}");
        cache.invalidate("https://example.invalid/p.json");
        assert!(cache.cached("https://example.invalid/p.json").is_none());
    }

    #[tokio::test]
    async fn test_prompt_template_requires_fields() {
        let cache = SourceCache::new(Duration::from_secs(60));
        cache.insert_for_test("https://example.invalid/bad.json", r#"{"system":"","user":"u"}"#);
        let err = cache
            .fetch_prompts("https://example.invalid/bad.json")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing system or user"));
    }

    #[test]
    fn test_active_subfolder_list_parses() {
        let json = r#"{
            "subfolders": [
                {"topic": "Invoices", "folderId": "f-1", "keywords": ["invoice", "bill"]},
                {"topic": "Receipts", "folderId": "f-2"}
            ],
            "fallbackFolderId": "f-0"
        }"#;
        let list: ActiveSubfolderList = serde_json::from_str(json).unwrap();
        assert_eq!(list.subfolders.len(), 2);
        assert_eq!(list.subfolders[0].keywords, vec!["invoice", "bill"]);
        assert_eq!(list.fallback_folder_id.as_deref(), Some("f-0"));
    }
}
