//! Shared types, error model, and configuration for BuildLens.
//!
//! This crate is the foundation depended on by all other BuildLens crates.
//! It provides:
//! - [`BuildLensError`] and [`FetchError`] — the unified error model
//! - Domain types ([`LookupKey`], [`EnrichedRecord`], [`BuildDescription`],
//!   [`EnrichedContext`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, FetchConfig, OpenRouterConfig, SourceSettings, SourcesConfig,
    USER_AGENT, config_dir, config_file_path, expand_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{BuildLensError, FetchError, Result};
pub use types::{
    BuildBasics, BuildDescription, CacheEntry, EnrichedContext, EnrichedRecord, EntityEntry,
    ItemDescriptor, ItemRarity, LookupKey, Payload, SkillGem, SkillGroup, SourceDomain,
    SourceFailure, SourceId, normalize_name,
};
