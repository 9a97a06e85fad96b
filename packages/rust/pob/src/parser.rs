//! PoB XML decode.
//!
//! The export is one XML document: a `<Build>` element with attributes and
//! `<PlayerStat>` children, `<Skills>/<SkillSet>/<Skill>/<Gem>` socket
//! groups, `<Items>/<Item>` free-text blocks, and a `<Tree>/<Spec>` with a
//! comma-separated `nodes` attribute. Item blocks have no schema at all, so
//! their name/base/mod split is heuristic.

use std::collections::BTreeMap;
use std::str::FromStr;

use roxmltree::{Document, Node};

use buildlens_shared::error::{BuildLensError, Result};
use buildlens_shared::types::{
    BuildBasics, BuildDescription, ItemDescriptor, ItemRarity, SkillGem, SkillGroup,
};

/// Player stats surfaced into the build description, as
/// `(display name, PoB stat attribute)` pairs.
const STAT_MAP: &[(&str, &str)] = &[
    ("Life", "Life"),
    ("Mana", "Mana"),
    ("EnergyShield", "EnergyShield"),
    ("Armour", "Armour"),
    ("Evasion", "Evasion"),
    ("FireResist", "FireResist"),
    ("ColdResist", "ColdResist"),
    ("LightningResist", "LightningResist"),
    ("ChaosResist", "ChaosResist"),
    ("EffectiveHP", "TotalEHP"),
    ("CritChance", "CritChance"),
    ("CritMultiplier", "CritMultiplier"),
    ("HitChance", "HitChance"),
    ("AttackSpeed", "Speed"),
    ("ManaRegen", "ManaRegenRecovery"),
    ("LifeRegen", "LifeRegenRecovery"),
    ("TotalDPS", "TotalDPS"),
    ("CombinedDPS", "CombinedDPS"),
];

/// Decode a PoB XML export into the build entity model.
pub fn decode_build(xml: &str) -> Result<BuildDescription> {
    let doc = Document::parse(xml)
        .map_err(|e| BuildLensError::decode(format!("malformed PoB XML: {e}")))?;
    let root = doc.root_element();

    let build_el = child_element(root, "Build")
        .ok_or_else(|| BuildLensError::decode("no <Build> element in export"))?;

    let mut description = BuildDescription {
        basics: decode_basics(build_el),
        stats: decode_stats(build_el),
        skills: decode_skills(root),
        items: decode_items(root),
        passives: decode_passives(root),
    };

    description.basics.main_skill = description
        .skills
        .iter()
        .find(|group| group.is_main)
        .and_then(|group| group.gems.first())
        .map(|gem| gem.name.clone());

    tracing::debug!(
        skills = description.skills.len(),
        items = description.items.len(),
        passives = description.passives.len(),
        "decoded build"
    );
    Ok(description)
}

fn child_element<'a>(node: Node<'a, 'a>, name: &str) -> Option<Node<'a, 'a>> {
    node.children().find(|c| c.has_tag_name(name))
}

// ---------------------------------------------------------------------------
// Basics + stats
// ---------------------------------------------------------------------------

fn decode_basics(build_el: Node<'_, '_>) -> BuildBasics {
    BuildBasics {
        class_name: build_el.attribute("className").map(str::to_string),
        ascendancy: build_el.attribute("ascendClassName").map(str::to_string),
        level: build_el.attribute("level").and_then(|v| v.parse().ok()),
        main_skill: None,
    }
}

fn decode_stats(build_el: Node<'_, '_>) -> BTreeMap<String, String> {
    let mut stats = BTreeMap::new();
    for stat_el in build_el.children().filter(|c| c.has_tag_name("PlayerStat")) {
        let (Some(name), Some(value)) = (stat_el.attribute("stat"), stat_el.attribute("value"))
        else {
            continue;
        };
        if let Some((display, _)) = STAT_MAP.iter().find(|(_, attr)| *attr == name) {
            stats.insert((*display).to_string(), value.to_string());
        }
    }
    stats
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

fn decode_skills(root: Node<'_, '_>) -> Vec<SkillGroup> {
    let Some(skills_el) = child_element(root, "Skills") else {
        return Vec::new();
    };

    let mut groups = Vec::new();
    for set in skills_el.children().filter(|c| c.has_tag_name("SkillSet")) {
        for skill in set.children().filter(|c| c.has_tag_name("Skill")) {
            let gems: Vec<SkillGem> = skill
                .children()
                .filter(|c| c.has_tag_name("Gem"))
                .filter_map(decode_gem)
                .collect();
            // Groups without gems are granted-skill placeholders.
            if gems.is_empty() {
                continue;
            }
            groups.push(SkillGroup {
                label: skill.attribute("label").unwrap_or_default().to_string(),
                enabled: skill.attribute("enabled") == Some("true"),
                is_main: skill.attribute("mainActiveSkill") == Some("1"),
                gems,
            });
        }
    }
    groups
}

fn decode_gem(gem_el: Node<'_, '_>) -> Option<SkillGem> {
    let name = gem_el.attribute("nameSpec")?.trim();
    if name.is_empty() {
        return None;
    }
    Some(SkillGem {
        name: name.to_string(),
        level: gem_el.attribute("level").and_then(|v| v.parse().ok()),
        quality: gem_el.attribute("quality").and_then(|v| v.parse().ok()),
        enabled: gem_el.attribute("enabled") == Some("true"),
    })
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Metadata lines in an item block that are neither name, base, nor mod.
const META_PREFIXES: &[&str] = &[
    "unique id:",
    "item level:",
    "quality:",
    "levelreq:",
    "sockets:",
    "rune:",
    "implicits:",
    "radius:",
    "evasion:",
    "energy shield:",
    "armour:",
    "spirit:",
];

/// A line containing any of these reads as a modifier rather than a base
/// type. Only consulted for rarities where the base-type line is ambiguous.
const MOD_KEYWORDS: &[&str] = &[
    "%", "Adds", " to ", "+", "Leech", "Regenerate", "Penetrates", "increased", "reduced", "more",
    "less", "Gain", "Grants Skill", "Allocates",
];

fn looks_like_mod(line: &str) -> bool {
    MOD_KEYWORDS.iter().any(|kw| line.contains(kw))
}

fn is_meta_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    META_PREFIXES.iter().any(|p| lower.starts_with(p))
}

fn decode_items(root: Node<'_, '_>) -> Vec<ItemDescriptor> {
    let Some(items_el) = child_element(root, "Items") else {
        return Vec::new();
    };

    // itemId -> slot name, from the active item set.
    let mut slot_map: BTreeMap<&str, String> = BTreeMap::new();
    if let Some(item_set) = child_element(items_el, "ItemSet") {
        for slot in item_set.children().filter(|c| c.has_tag_name("Slot")) {
            if let (Some(item_id), Some(name)) = (slot.attribute("itemId"), slot.attribute("name"))
            {
                slot_map.insert(item_id, name.to_string());
            }
        }
    }
    // Jewels live in tree sockets, not equipment slots.
    if let Some(tree_el) = child_element(root, "Tree") {
        for spec in tree_el.children().filter(|c| c.has_tag_name("Spec")) {
            let Some(sockets) = child_element(spec, "Sockets") else {
                continue;
            };
            for socket in sockets.children().filter(|c| c.has_tag_name("Socket")) {
                if let (Some(item_id), Some(node_id)) =
                    (socket.attribute("itemId"), socket.attribute("nodeId"))
                {
                    slot_map
                        .entry(item_id)
                        .or_insert_with(|| format!("Jewel Socket (Tree Node {node_id})"));
                }
            }
        }
    }

    let mut items = Vec::new();
    for item_el in items_el.children().filter(|c| c.has_tag_name("Item")) {
        let Some(text) = item_el.text() else { continue };
        let slot = item_el
            .attribute("id")
            .and_then(|id| slot_map.get(id))
            .cloned()
            .unwrap_or_default();
        if let Some(item) = parse_item_block(&slot, text) {
            items.push(item);
        }
    }
    items
}

/// Split one item text block into rarity, name, base type, and mod lines.
fn parse_item_block(slot: &str, text: &str) -> Option<ItemDescriptor> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let mut idx = 0;
    let rarity = if let Some(value) = lines[idx].strip_prefix("Rarity:") {
        idx += 1;
        // FromStr is infallible, unknown strings map to Unknown.
        ItemRarity::from_str(value).unwrap_or(ItemRarity::Unknown)
    } else {
        ItemRarity::Unknown
    };

    let name = lines.get(idx)?.to_string();
    idx += 1;

    // Rare and unique blocks carry the base type on its own line; magic and
    // normal names embed it, so it stays empty there.
    let mut base_type = String::new();
    if matches!(rarity, ItemRarity::Rare | ItemRarity::Unique) {
        if let Some(line) = lines.get(idx) {
            if !is_meta_line(line) && !looks_like_mod(line) {
                base_type = (*line).to_string();
                idx += 1;
            }
        }
    }

    let mods: Vec<String> = lines[idx..]
        .iter()
        .filter(|line| !is_meta_line(line))
        .filter(|line| {
            looks_like_mod(line) || matches!(rarity, ItemRarity::Rare | ItemRarity::Unique)
        })
        .map(|line| (*line).to_string())
        .collect();

    Some(ItemDescriptor {
        slot: slot.to_string(),
        name,
        base_type,
        rarity,
        mods,
    })
}

// ---------------------------------------------------------------------------
// Passive tree
// ---------------------------------------------------------------------------

fn decode_passives(root: Node<'_, '_>) -> Vec<u32> {
    let Some(tree_el) = child_element(root, "Tree") else {
        return Vec::new();
    };
    let Some(spec) = child_element(tree_el, "Spec") else {
        return Vec::new();
    };
    let Some(nodes) = spec.attribute("nodes") else {
        return Vec::new();
    };

    let mut ids: Vec<u32> = nodes
        .split(',')
        .filter_map(|raw| raw.trim().parse().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}
