//! Core domain types for BuildLens enrichment.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Opaque structured data contributed by one source for one entity.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// SourceDomain / SourceId
// ---------------------------------------------------------------------------

/// The kind of entity a lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceDomain {
    Item,
    Skill,
    Passive,
    CommunityTopic,
    PatchNotes,
}

impl SourceDomain {
    /// Stable string form, used as a database column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Skill => "skill",
            Self::Passive => "passive",
            Self::CommunityTopic => "community-topic",
            Self::PatchNotes => "patch-notes",
        }
    }
}

impl std::fmt::Display for SourceDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceDomain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "item" => Ok(Self::Item),
            "skill" => Ok(Self::Skill),
            "passive" => Ok(Self::Passive),
            "community-topic" => Ok(Self::CommunityTopic),
            "patch-notes" => Ok(Self::PatchNotes),
            other => Err(format!("unknown source domain: {other}")),
        }
    }
}

/// Identifier for one external data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    Poe2Db,
    PoeWiki,
    Reddit,
    Forum,
}

impl SourceId {
    /// Stable string form, used as a database column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poe2Db => "poe2db",
            Self::PoeWiki => "poe-wiki",
            Self::Reddit => "reddit",
            Self::Forum => "forum",
        }
    }

    /// All known sources in priority order (most trusted first).
    pub fn priority_order() -> [SourceId; 4] {
        [Self::Poe2Db, Self::PoeWiki, Self::Reddit, Self::Forum]
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "poe2db" => Ok(Self::Poe2Db),
            "poe-wiki" => Ok(Self::PoeWiki),
            "reddit" => Ok(Self::Reddit),
            "forum" => Ok(Self::Forum),
            other => Err(format!("unknown source id: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// LookupKey
// ---------------------------------------------------------------------------

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Shorthand names the community uses for PoE2 entities, mapped to the
/// canonical page names the sources index under.
const ALIASES: &[(&str, &str)] = &[
    ("hotg", "Hammer of the Gods"),
    ("coc", "Cast on Critical"),
    ("ci", "Chaos Inoculation"),
    ("mom", "Mind Over Matter"),
];

/// Normalize an entity name for lookup and cache addressing.
///
/// Trims, collapses internal whitespace, replaces typographic apostrophes,
/// and resolves known community aliases. Idempotent: normalizing an already
/// normalized name returns it unchanged.
pub fn normalize_name(raw: &str) -> String {
    let trimmed = raw.trim().replace('\u{2019}', "'");
    let collapsed = WHITESPACE.replace_all(&trimmed, " ").into_owned();

    let lowered = collapsed.to_lowercase();
    for (alias, canonical) in ALIASES {
        if lowered == *alias {
            return (*canonical).to_string();
        }
    }
    collapsed
}

/// Normalized identifier for a build entity, used to address external
/// sources and cache entries.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LookupKey {
    /// Entity kind.
    pub domain: SourceDomain,
    /// Normalized entity name (node id for passives).
    pub name: String,
    /// Optional refinement, e.g. `"unique"` vs `"base"` for items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disambiguator: Option<String>,
}

impl LookupKey {
    /// Create a key, normalizing the raw name.
    pub fn new(domain: SourceDomain, raw_name: &str) -> Self {
        Self {
            domain,
            name: normalize_name(raw_name),
            disambiguator: None,
        }
    }

    /// Create a key with a disambiguator.
    pub fn with_disambiguator(domain: SourceDomain, raw_name: &str, disambiguator: &str) -> Self {
        Self {
            domain,
            name: normalize_name(raw_name),
            disambiguator: Some(disambiguator.to_string()),
        }
    }
}

impl std::fmt::Display for LookupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.disambiguator {
            Some(d) => write!(f, "{}:{}#{d}", self.domain, self.name),
            None => write!(f, "{}:{}", self.domain, self.name),
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichedRecord / CacheEntry
// ---------------------------------------------------------------------------

/// One source's contribution of data for a [`LookupKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    /// The entity this record describes.
    pub key: LookupKey,
    /// Which source produced it.
    pub source: SourceId,
    /// Opaque structured data extracted from the source.
    pub payload: Payload,
    /// When the fetch happened.
    pub fetched_at: DateTime<Utc>,
    /// How long the record stays fresh, in seconds.
    pub ttl_secs: u64,
    /// True when this record was served past its TTL because every live
    /// source failed (staleness fallback).
    #[serde(default)]
    pub stale: bool,
}

impl EnrichedRecord {
    /// Whether the record has outlived its TTL as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        age.num_seconds() >= self.ttl_secs as i64
    }
}

/// The persisted form of a record plus a freshness flag computed at read
/// time. Owned exclusively by the cache store.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub record: EnrichedRecord,
    /// `fetched_at + ttl` is still in the future.
    pub fresh: bool,
}

// ---------------------------------------------------------------------------
// Build description (decode contract)
// ---------------------------------------------------------------------------

/// Class, ascendancy and level header of a build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildBasics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ascendancy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    /// Name of the first gem in the main socket group, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_skill: Option<String>,
}

/// A single gem in a skill group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillGem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    pub enabled: bool,
}

/// One socket group of gems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillGroup {
    #[serde(default)]
    pub label: String,
    pub enabled: bool,
    pub is_main: bool,
    pub gems: Vec<SkillGem>,
}

/// Item rarity as written in the PoB item block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemRarity {
    Normal,
    Magic,
    Rare,
    Unique,
    Unknown,
}

impl std::str::FromStr for ItemRarity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.trim().to_uppercase().as_str() {
            "NORMAL" => Self::Normal,
            "MAGIC" => Self::Magic,
            "RARE" => Self::Rare,
            "UNIQUE" => Self::Unique,
            _ => Self::Unknown,
        })
    }
}

/// An equipped item from the build description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    #[serde(default)]
    pub slot: String,
    pub name: String,
    #[serde(default)]
    pub base_type: String,
    pub rarity: ItemRarity,
    #[serde(default)]
    pub mods: Vec<String>,
}

/// The decoded entity model of one build: ordered skills, ordered items,
/// ordered set of passive node ids. Produced by the decode step, consumed
/// by the entity extractor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildDescription {
    #[serde(default)]
    pub basics: BuildBasics,
    /// Character stats keyed by display name (ordering stable).
    #[serde(default)]
    pub stats: BTreeMap<String, String>,
    #[serde(default)]
    pub skills: Vec<SkillGroup>,
    #[serde(default)]
    pub items: Vec<ItemDescriptor>,
    /// Allocated passive tree node ids, ascending.
    #[serde(default)]
    pub passives: Vec<u32>,
}

// ---------------------------------------------------------------------------
// EnrichedContext
// ---------------------------------------------------------------------------

/// A per-source failure note retained in the final context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: SourceId,
    /// Failure kind: `not-found`, `rate-limited`, `unreachable`, `parse`,
    /// or `deadline`.
    pub kind: String,
}

/// All enrichment data gathered for a single [`LookupKey`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub key: LookupKey,
    /// Records in source-priority order. May be empty.
    pub records: Vec<EnrichedRecord>,
    /// Sources that failed for this key, with the failure kind.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SourceFailure>,
    /// True when no source contributed any record.
    pub unenriched: bool,
}

impl EntityEntry {
    /// Build an entry, deriving the `unenriched` flag.
    pub fn new(key: LookupKey, records: Vec<EnrichedRecord>, failures: Vec<SourceFailure>) -> Self {
        let unenriched = records.is_empty();
        Self {
            key,
            records,
            failures,
            unenriched,
        }
    }
}

/// The final merged, immutable view of one run: the build description plus
/// every entity's enrichment records. Handed to the reasoning client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedContext {
    pub build: BuildDescription,
    /// One entry per extracted key, in extraction order.
    pub entries: Vec<EntityEntry>,
    pub generated_at: DateTime<Utc>,
    /// True when the coordination deadline fired and in-flight lookups were
    /// abandoned.
    #[serde(default)]
    pub partial: bool,
}

impl EnrichedContext {
    /// Look up the entry for a key, if present.
    pub fn entry(&self, key: &LookupKey) -> Option<&EntityEntry> {
        self.entries.iter().find(|e| &e.key == key)
    }
}
