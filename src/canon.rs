//! Canonical issuer reference table: parsing, the model-driven update
//! proposal, and the append-alias persist path.
//!
//! The table is one JSON document (`{"issuers": [{master, aliases}]}`)
//! stored at a fixed file id. It is mutated in exactly one way: appending a
//! new alias to an existing master. Masters are never created or deleted
//! here.
//!
//! The update proposal comes from a structured-extraction completion over
//! the draft and edited summaries plus the full table. The model response
//! is an untrusted parser boundary: it must be a JSON object with string
//! `canonical` and `alias` fields (code fences stripped first); anything
//! else is a parse error. This path fails loudly — it is advisory, so the
//! caller attaches it best-effort to the save flow.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::completion::{CompletionBackend, CompletionRequest, UserPart};
use crate::config::Config;
use crate::drive::DriveClient;
use crate::models::IssuerCanonEntry;
use crate::sources::{substitute, SourceCache};

/// The stored reference table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CanonTable {
    #[serde(default)]
    pub issuers: Vec<IssuerCanonEntry>,
}

/// Outcome of the model's update judgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonProposal {
    /// Empty-string pair from the model: nothing to record.
    NoAction,
    /// Associate `alias` with the existing master `canonical`.
    Update { canonical: String, alias: String },
}

/// Parse the stored table, tolerating an empty document.
pub fn parse_table(table_json: &str) -> Result<CanonTable> {
    serde_json::from_str(table_json).context("Canonical table is not valid JSON")
}

/// Ask the model whether the edited summary reveals a new alias for an
/// existing canonical issuer.
pub async fn propose_update(
    backend: &dyn CompletionBackend,
    cache: &SourceCache,
    config: &Config,
    table_json: &str,
    draft_summary: &str,
    edited_summary: &str,
) -> Result<CanonProposal> {
    let template = cache
        .fetch_prompts(&config.sources.canon_prompts_url)
        .await?;

    let user = substitute(
        &template.user,
        &[
            ("CANONICAL_BIBLE_JSON", table_json),
            ("draftSummary", draft_summary),
            ("editableSummary", edited_summary),
        ],
    );

    let request = CompletionRequest {
        system: template.system,
        user: vec![UserPart::Text(user)],
        temperature: None,
        max_tokens: 256,
        json_object: true,
    };

    let raw = backend.complete(request).await?;
    parse_proposal(&raw)
}

/// Parse the model's `{canonical, alias}` response.
///
/// Strict: after stripping code-fence markers the text must be a JSON
/// object whose `canonical` and `alias` fields are both strings. A pair
/// with either side empty means no action.
pub fn parse_proposal(raw: &str) -> Result<CanonProposal> {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value = serde_json::from_str(cleaned.trim())
        .context("Completion output is not valid JSON")?;
    let obj = value
        .as_object()
        .context("Completion output is not a JSON object")?;

    let field = |name: &str| -> Result<String> {
        obj.get(name)
            .with_context(|| format!("Completion output missing '{}' field", name))?
            .as_str()
            .with_context(|| format!("Completion output '{}' field is not a string", name))
            .map(|s| s.trim().to_string())
    };

    let canonical = field("canonical")?;
    let alias = field("alias")?;

    if canonical.is_empty() || alias.is_empty() {
        Ok(CanonProposal::NoAction)
    } else {
        Ok(CanonProposal::Update { canonical, alias })
    }
}

/// Remove ```json fences the model sometimes wraps around its output.
fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "")
}

/// Append an alias to an existing master entry, in memory.
///
/// Errors if the master is absent — this transform never creates masters.
/// Appending an alias that is already recorded (or equals the master) is a
/// no-op, keeping the persist path idempotent.
pub fn append_alias(table: &mut CanonTable, canonical: &str, alias: &str) -> Result<bool> {
    let entry = table
        .issuers
        .iter_mut()
        .find(|e| e.master == canonical)
        .with_context(|| format!("No canonical master named '{}'", canonical))?;

    if entry.master == alias || entry.aliases.iter().any(|a| a == alias) {
        return Ok(false);
    }
    entry.aliases.push(alias.to_string());
    Ok(true)
}

/// Persist an accepted proposal: re-read the table at its fixed location,
/// apply the append in memory, and overwrite the stored content in place.
///
/// The overwrite is computed from the fresh read immediately before the
/// write; there is no versioning or conditional-write check on this path.
pub async fn persist_update(
    drive: &DriveClient,
    canonical_file_id: &str,
    canonical: &str,
    alias: &str,
) -> Result<()> {
    let current = drive.download_text(canonical_file_id).await?;
    let mut table = parse_table(&current)?;

    if !append_alias(&mut table, canonical, alias)? {
        return Ok(());
    }

    let body = serde_json::to_vec_pretty(&table)?;
    drive
        .update_media(canonical_file_id, &body, "application/json")
        .await
}

/// Fetch the raw canonical table content from its fixed location.
pub async fn fetch_table_content(drive: &DriveClient, config: &Config) -> Result<String> {
    let file_id = config
        .drive
        .canonical_file_id
        .as_deref()
        .context("Missing drive.canonical_file_id configuration")?;
    drive.download_text(file_id).await
}

// ============ Summary annotation helper ============

/// Append an `Issuer Canon:` note for a selected entry to a summary,
/// unless the master already appears in it.
pub fn apply_canon_to_summary(current_summary: &str, entry: &IssuerCanonEntry) -> String {
    let insertion = if entry.aliases.is_empty() {
        format!("Issuer Canon: {}", entry.master)
    } else {
        format!(
            "Issuer Canon: {} (aliases: {})",
            entry.master,
            entry.aliases.join(", ")
        )
    };

    let trimmed = current_summary.trim();
    if trimmed.is_empty() {
        return insertion;
    }
    if trimmed.contains(&entry.master) {
        return trimmed.to_string();
    }
    format!("{}\n\n{}", trimmed, insertion)
}
