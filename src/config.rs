use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub drive: DriveConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    pub sources: SourcesConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Storage-backend identifiers. The bearer token is request-scoped and never
/// part of the configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    /// Monitored root folder; the refresh operation walks its subfolders.
    pub root_folder_id: String,
    /// Destination used when folder resolution cannot pick a topic.
    pub fallback_folder_id: String,
    /// File id of the canonical-issuer table. Optional: when absent, the
    /// canonical endpoints fail with a configuration error at call time.
    #[serde(default)]
    pub canonical_file_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Token budget for image summarization.
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    /// Token budget for short naming/classification calls.
    #[serde(default = "default_label_max_tokens")]
    pub label_max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            summary_max_tokens: default_summary_max_tokens(),
            label_max_tokens: default_label_max_tokens(),
        }
    }
}

impl CompletionConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_summary_max_tokens() -> u32 {
    400
}
fn default_label_max_tokens() -> u32 {
    64
}

/// Remote JSON documents consumed at runtime: prompt templates, the active
/// destination-folder list, and the canonical-issuer table location.
#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    /// Prompt template for image summarization.
    pub prompts_url: String,
    /// Prompt template for the canonical-update extraction call.
    pub canon_prompts_url: String,
    /// Prompt template for set-name derivation.
    pub set_name_prompts_url: String,
    /// Active destination folders (`{subfolders: [...], fallbackFolderId}`).
    pub active_subfolders_url: String,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    // Configuration sources change rarely; a long TTL keeps request latency
    // down while still recovering from edits without a restart.
    3600
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.drive.root_folder_id.trim().is_empty() {
        anyhow::bail!("drive.root_folder_id must not be empty");
    }
    if config.drive.fallback_folder_id.trim().is_empty() {
        anyhow::bail!("drive.fallback_folder_id must not be empty");
    }

    match config.completion.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown completion provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.completion.is_enabled() && config.completion.model.trim().is_empty() {
        anyhow::bail!(
            "completion.model must be specified when provider is '{}'",
            config.completion.provider
        );
    }

    for (field, value) in [
        ("sources.prompts_url", &config.sources.prompts_url),
        ("sources.canon_prompts_url", &config.sources.canon_prompts_url),
        (
            "sources.set_name_prompts_url",
            &config.sources.set_name_prompts_url,
        ),
        (
            "sources.active_subfolders_url",
            &config.sources.active_subfolders_url,
        ),
    ] {
        if value.trim().is_empty() {
            anyhow::bail!("{} must not be empty", field);
        }
    }

    Ok(config)
}
