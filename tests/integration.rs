//! Cross-module behavior of the save and refresh pipelines, exercised
//! without a network: manifest merge across successive refreshes, wire-form
//! round trips, and the deterministic fallbacks of the resolution paths.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use docvault::canon::{parse_proposal, CanonProposal};
use docvault::completion::{CompletionBackend, CompletionRequest};
use docvault::config::Config;
use docvault::manifest::{merge_manifest, FileMeta, Manifest};
use docvault::resolver::derive_set_name;
use docvault::slug::normalize_filename;
use docvault::sources::SourceCache;

fn test_config() -> Config {
    toml::from_str(
        r#"
[server]
bind = "127.0.0.1:0"

[drive]
root_folder_id = "f-root"
fallback_folder_id = "f-fallback"
canonical_file_id = "f-canon"

[sources]
prompts_url = "data:unsupported"
canon_prompts_url = "data:unsupported"
set_name_prompts_url = "data:unsupported"
active_subfolders_url = "data:unsupported"
"#,
    )
    .unwrap()
}

/// A completion backend with no usable credential: every call fails, the
/// way the OpenAI backend does when `OPENAI_API_KEY` is absent.
struct NoCredentialBackend;

#[async_trait]
impl CompletionBackend for NoCredentialBackend {
    async fn complete(&self, _request: CompletionRequest) -> Result<String> {
        anyhow::bail!("OPENAI_API_KEY not set")
    }
}

fn folder_manifest(key: &str, items: &[&str], updated_at: i64) -> Manifest {
    let mut m = Manifest {
        updated_at,
        ..Default::default()
    };
    m.folders.insert(key.to_string(), "f-topic".to_string());
    m.tree
        .insert(key.to_string(), items.iter().map(|s| s.to_string()).collect());
    for id in items {
        m.files.insert(
            id.to_string(),
            FileMeta {
                name: format!("{id}.png"),
                mime_type: "image/png".to_string(),
            },
        );
    }
    m
}

#[test]
fn successive_refreshes_accumulate_tree_entries() {
    // Refresh 1 observes {a, b}; refresh 2 observes {b, c}. After merging,
    // the folder's tree entry holds exactly {a, b, c} and file metadata
    // exists for every id in the tree.
    let first = folder_manifest("docs/topic", &["a", "b"], 100);
    let second = folder_manifest("docs/topic", &["b", "c"], 200);

    let merged = merge_manifest(Some(first), second, false);

    let expected: BTreeSet<String> =
        ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(merged.tree["docs/topic"], expected);
    assert_eq!(merged.updated_at, 200);
    for id in &merged.tree["docs/topic"] {
        assert!(merged.files.contains_key(id), "tree id {id} missing from files");
    }
}

#[test]
fn replace_mode_ignores_prior_state() {
    let prior = folder_manifest("docs/old", &["x", "y"], 1);
    let incoming = folder_manifest("docs/new", &["z"], 2);
    let merged = merge_manifest(Some(prior), incoming.clone(), true);
    assert_eq!(merged, incoming);
}

#[test]
fn manifest_survives_wire_round_trip() {
    let mut m = folder_manifest("docs/topic", &["b", "a"], 42);
    m.inline_assets.insert(
        "doc-1".to_string(),
        [("./a.png".to_string(), "a".to_string())].into_iter().collect(),
    );

    let wire = serde_json::to_string_pretty(&m).unwrap();
    assert!(wire.contains("\"inlineAssets\""));
    assert!(wire.contains("\"updatedAt\""));
    assert!(wire.contains("\"mimeType\""));

    let back: Manifest = serde_json::from_str(&wire).unwrap();
    assert_eq!(back, m);
}

#[tokio::test]
async fn set_name_falls_back_deterministically_without_credential() {
    let cache = SourceCache::new(std::time::Duration::from_secs(60));
    let config = test_config();
    let today = Utc::now().date_naive();

    let name = derive_set_name(
        &NoCredentialBackend,
        &cache,
        &config,
        "Invoice from Acme Corp due March 1",
        today,
    )
    .await;

    assert!(name.is_defaulted());
    let value = name.into_value();

    // <slug>-<8-digit-date>, slug from the first few words only.
    let (slug, date) = value.rsplit_once('-').unwrap();
    assert_eq!(slug, "Invoice-from-Acme-Corp");
    assert_eq!(date.len(), 8);
    assert_eq!(date, today.format("%Y%m%d").to_string());
    for ch in ['\\', '/', ':', '*', '?', '"', '<', '>', '|'] {
        assert!(!value.contains(ch));
    }

    // Same input, same day, same output.
    let again = derive_set_name(
        &NoCredentialBackend,
        &cache,
        &config,
        "Invoice from Acme Corp due March 1",
        today,
    )
    .await;
    assert_eq!(again.into_value(), value);
}

#[tokio::test]
async fn set_name_date_suffix_is_stable_for_fixed_date() {
    let cache = SourceCache::new(std::time::Duration::from_secs(60));
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 8, 28).unwrap();

    let name = derive_set_name(&NoCredentialBackend, &cache, &config, "Utility bill", date).await;
    assert_eq!(name.into_value(), "Utility-bill-20260828");
}

#[test]
fn empty_pair_proposal_means_no_action() {
    let proposal = parse_proposal(r#"{"canonical": "", "alias": ""}"#).unwrap();
    assert_eq!(proposal, CanonProposal::NoAction);
}

#[test]
fn normalization_is_idempotent_over_derived_names() {
    for raw in [
        "Acme Invoice 2026-03",
        "電力公司 帳單",
        "a/b\\c:d",
        "  spaced   out  ",
    ] {
        let slug = normalize_filename(raw);
        assert_eq!(normalize_filename(&slug), slug);
        assert!(!slug.is_empty());
        assert!(slug.chars().count() <= 80);
    }
}
