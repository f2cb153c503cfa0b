//! # docvault
//!
//! A document-capture persistence service for cloud file stores.
//!
//! A browser UI captures document pages and hands them to this service: a
//! vision-language model produces a summary, the service derives a
//! deterministic set name, resolves a destination folder among the active
//! topics, uploads the pages plus a Markdown summary document, and folds the
//! result into the folder's persisted `manifest.json` index. An evolving
//! canonical-issuer reference table can additionally be updated from model
//! proposals.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Capture UI │──▶│   HTTP API   │──▶│  Drive REST  │
//! │ (external) │   │ save/refresh │   │ list/upload  │
//! └────────────┘   └──────┬───────┘   └──────────────┘
//!                         │
//!             ┌───────────┴───────────┐
//!             ▼                       ▼
//!       ┌──────────┐           ┌─────────────┐
//!       │ complete │           │  manifest   │
//!       │ (OpenAI) │           │ merge/upsert│
//!       └──────────┘           └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`slug`] | Filename normalization |
//! | [`drive`] | Storage backend REST client |
//! | [`manifest`] | Manifest model, merge protocol, and store |
//! | [`completion`] | Text-completion backend |
//! | [`sources`] | Remote configuration sources + cache |
//! | [`resolver`] | Folder resolution and set-name derivation |
//! | [`canon`] | Canonical issuer table updates |
//! | [`persister`] | Bundle persistence orchestration |
//! | [`refresh`] | Folder-tree manifest refresh |
//! | [`server`] | HTTP server |

pub mod canon;
pub mod completion;
pub mod config;
pub mod drive;
pub mod manifest;
pub mod models;
pub mod persister;
pub mod refresh;
pub mod resolver;
pub mod server;
pub mod slug;
pub mod sources;
