//! Destination-folder resolution and set-name derivation.
//!
//! Both operations sit on the save path and are not allowed to block it:
//! any fetch, network, or parse failure degrades to a deterministic
//! fallback instead of raising. Which path ran is visible in the
//! [`Resolution`] result so callers and tests can tell a model-resolved
//! value from a defaulted one.

use anyhow::{bail, Result};
use chrono::NaiveDate;

use crate::completion::{CompletionBackend, CompletionRequest};
use crate::config::Config;
use crate::models::ActiveSubfolder;
use crate::slug::normalize_filename;
use crate::sources::{substitute, ActiveSubfolderList, SourceCache};

/// Outcome of a fallible-but-non-blocking resolution step.
///
/// `Defaulted` carries the reason the primary path was abandoned, so the
/// degradation is observable without failing the save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    Resolved(T),
    Defaulted { value: T, reason: String },
}

impl<T> Resolution<T> {
    pub fn value(&self) -> &T {
        match self {
            Resolution::Resolved(v) => v,
            Resolution::Defaulted { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Resolution::Resolved(v) => v,
            Resolution::Defaulted { value, .. } => value,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Resolution::Defaulted { .. })
    }
}

/// Destination picked for a document bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderChoice {
    pub folder_id: String,
    pub topic: Option<String>,
}

const TOPIC_SYSTEM_PROMPT: &str = "You are a filing assistant. Given a list of topics and a \
document summary, answer with exactly one topic name from the list that best matches the \
summary, or the word none if no topic fits. Answer with the topic name only.";

/// Resolve the destination folder for a summary among the active candidate
/// folders, falling back to the configured fallback folder.
pub async fn resolve_folder(
    backend: &dyn CompletionBackend,
    cache: &SourceCache,
    config: &Config,
    summary: &str,
) -> Resolution<FolderChoice> {
    let fallback = |reason: String| Resolution::Defaulted {
        value: FolderChoice {
            folder_id: config.drive.fallback_folder_id.clone(),
            topic: None,
        },
        reason,
    };

    let list: ActiveSubfolderList = match cache
        .fetch_json(&config.sources.active_subfolders_url)
        .await
    {
        Ok(list) => list,
        Err(e) => return fallback(format!("active subfolder fetch failed: {e}")),
    };

    let fallback_id = list
        .fallback_folder_id
        .clone()
        .unwrap_or_else(|| config.drive.fallback_folder_id.clone());
    let fallback = |reason: String| Resolution::Defaulted {
        value: FolderChoice {
            folder_id: fallback_id.clone(),
            topic: None,
        },
        reason,
    };

    if list.subfolders.is_empty() {
        return fallback("no active subfolders configured".to_string());
    }

    let answer = match pick_topic(backend, config, &list.subfolders, summary).await {
        Ok(answer) => answer,
        Err(e) => return fallback(format!("topic completion failed: {e}")),
    };

    match match_topic(&answer, &list.subfolders) {
        Some(sub) => Resolution::Resolved(FolderChoice {
            folder_id: sub.folder_id.clone(),
            topic: Some(sub.topic.clone()),
        }),
        None => fallback(format!("model answer '{}' matched no candidate", answer.trim())),
    }
}

/// One deterministic classification call.
async fn pick_topic(
    backend: &dyn CompletionBackend,
    config: &Config,
    subfolders: &[ActiveSubfolder],
    summary: &str,
) -> Result<String> {
    let request = CompletionRequest::deterministic(
        TOPIC_SYSTEM_PROMPT,
        build_topic_prompt(subfolders, summary),
        config.completion.label_max_tokens,
    );
    let answer = backend.complete(request).await?;
    if answer.trim().is_empty() {
        bail!("empty completion response");
    }
    Ok(answer)
}

/// Render the candidate list plus summary into the classification prompt.
fn build_topic_prompt(subfolders: &[ActiveSubfolder], summary: &str) -> String {
    let mut out = String::from("Topics:\n");
    for sub in subfolders {
        out.push_str("- ");
        out.push_str(&sub.topic);
        if !sub.keywords.is_empty() {
            out.push_str(" (keywords: ");
            out.push_str(&sub.keywords.join(", "));
            out.push(')');
        }
        out.push('\n');
    }
    out.push_str("\nSummary:\n");
    out.push_str(summary);
    out
}

/// Match a model answer against the candidate topics. The answer must name
/// a candidate exactly (case-insensitive, surrounding whitespace ignored);
/// anything else, including `none`, matches nothing.
fn match_topic<'a>(answer: &str, subfolders: &'a [ActiveSubfolder]) -> Option<&'a ActiveSubfolder> {
    let answer = answer.trim();
    if answer.is_empty() || answer.eq_ignore_ascii_case("none") {
        return None;
    }
    subfolders
        .iter()
        .find(|sub| sub.topic.trim().eq_ignore_ascii_case(answer))
}

// ============ Set-name derivation ============

/// Derive the bundle's set name from the edited summary: a filename-safe
/// label plus a `YYYYMMDD` suffix.
///
/// The label comes from a deterministic completion over the configured
/// prompt template; on any failure it falls back to the first words of the
/// summary itself. Total: always returns a usable name.
pub async fn derive_set_name(
    backend: &dyn CompletionBackend,
    cache: &SourceCache,
    config: &Config,
    summary: &str,
    today: NaiveDate,
) -> Resolution<String> {
    let date_part = date_suffix(today);
    let fallback_name = format!("{}-{}", fallback_set_label(summary), date_part);

    let label = match model_set_label(backend, cache, config, summary).await {
        Ok(label) => label,
        Err(e) => {
            return Resolution::Defaulted {
                value: fallback_name,
                reason: format!("set-name completion failed: {e}"),
            }
        }
    };

    Resolution::Resolved(format!("{}-{}", label, date_part))
}

async fn model_set_label(
    backend: &dyn CompletionBackend,
    cache: &SourceCache,
    config: &Config,
    summary: &str,
) -> Result<String> {
    let template = cache
        .fetch_prompts(&config.sources.set_name_prompts_url)
        .await?;
    let word_target = template.word_target.unwrap_or(150).to_string();
    let user = substitute(
        &template.user,
        &[("summary", summary), ("wordTarget", &word_target)],
    );

    let request = CompletionRequest::deterministic(
        template.system,
        user,
        config.completion.label_max_tokens,
    );
    let label = backend.complete(request).await?;
    if label.trim().is_empty() {
        bail!("empty completion response");
    }
    Ok(normalize_filename(&label))
}

/// Deterministic fallback label: the first few words of the summary,
/// normalized.
fn fallback_set_label(summary: &str) -> String {
    let prefix: Vec<&str> = summary.split_whitespace().take(4).collect();
    normalize_filename(&prefix.join(" "))
}

/// `YYYYMMDD` date suffix appended to every set name.
fn date_suffix(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}
