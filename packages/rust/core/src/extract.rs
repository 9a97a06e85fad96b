//! Entity extraction from a decoded build.
//!
//! Pure and deterministic: the same build always yields the same keys in
//! the same order, with no duplicates. Order is meaningful downstream (it
//! fixes entry order in the final context), so extraction walks the build
//! in a fixed sequence: skills, items, passives, community topics, and
//! finally the patch-notes feed.

use std::collections::HashSet;

use buildlens_shared::types::{BuildDescription, ItemRarity, LookupKey, SourceDomain};

/// Derive every lookup key a build references.
pub fn extract_entities(build: &BuildDescription) -> Vec<LookupKey> {
    let mut keys = Vec::new();
    let mut seen = HashSet::new();

    let mut push = |key: LookupKey| {
        if seen.insert(key.clone()) {
            keys.push(key);
        }
    };

    // Active skill gems, socket order.
    for group in build.skills.iter().filter(|g| g.enabled) {
        for gem in group.gems.iter().filter(|g| g.enabled) {
            push(LookupKey::new(SourceDomain::Skill, &gem.name));
        }
    }

    // Uniques by name, everything else by base type.
    for item in &build.items {
        match item.rarity {
            ItemRarity::Unique => {
                push(LookupKey::with_disambiguator(
                    SourceDomain::Item,
                    &item.name,
                    "unique",
                ));
            }
            _ if !item.base_type.is_empty() => {
                push(LookupKey::with_disambiguator(
                    SourceDomain::Item,
                    &item.base_type,
                    "base",
                ));
            }
            _ => {}
        }
    }

    // Allocated tree nodes, already sorted ascending by the decoder.
    for node_id in &build.passives {
        push(LookupKey::new(SourceDomain::Passive, &node_id.to_string()));
    }

    // Community topics derived from the build header, no I/O involved.
    if let Some(main_skill) = &build.basics.main_skill {
        push(LookupKey::new(SourceDomain::CommunityTopic, main_skill));
        if let Some(class_name) = &build.basics.class_name {
            push(LookupKey::new(
                SourceDomain::CommunityTopic,
                &format!("{main_skill} {class_name}"),
            ));
        }
    }

    // Every build that yielded entities also tracks the latest game patch.
    if !keys.is_empty() {
        keys.push(LookupKey::new(SourceDomain::PatchNotes, "latest"));
    }

    keys
}
