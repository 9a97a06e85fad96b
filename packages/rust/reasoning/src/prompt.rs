//! Renders an [`EnrichedContext`] into the plain-text document the
//! reasoning model receives. Faithful data formatting only; no prompt
//! engineering lives here.

use serde_json::Value;

use buildlens_shared::types::{EnrichedContext, EntityEntry, ItemRarity, SourceDomain};

/// Flatten the context into a sectioned text document.
pub fn render_context(context: &EnrichedContext) -> String {
    let mut out = Vec::new();

    out.push("### Path of Exile 2 Build Analysis Data ###".to_string());
    if context.partial {
        out.push(
            "NOTE: enrichment was cut short by a deadline; some entities below may be missing data."
                .to_string(),
        );
    }

    out.push("\n--- BUILD BASICS ---".to_string());
    let basics = &context.build.basics;
    out.push(format!(
        "Class: {}",
        basics.class_name.as_deref().unwrap_or("Unknown")
    ));
    if let Some(ascendancy) = &basics.ascendancy {
        out.push(format!("Ascendancy: {ascendancy}"));
    }
    if let Some(level) = basics.level {
        out.push(format!("Level: {level}"));
    }
    out.push(format!(
        "Main Skill: {}",
        basics.main_skill.as_deref().unwrap_or("Unknown")
    ));

    out.push("\n--- CHARACTER STATS ---".to_string());
    for (name, value) in &context.build.stats {
        out.push(format!("{name}: {value}"));
    }

    out.push("\n--- SKILL SETUPS ---".to_string());
    for (i, group) in context.build.skills.iter().enumerate() {
        let main_marker = if group.is_main { " (MAIN SKILL)" } else { "" };
        let enabled = if group.enabled { "enabled" } else { "disabled" };
        out.push(format!("\n  Skill Group {}{main_marker} ({enabled}):", i + 1));
        for gem in &group.gems {
            if !gem.enabled {
                continue;
            }
            let level = gem.level.map_or("?".to_string(), |l| l.to_string());
            let quality = gem.quality.unwrap_or(0);
            out.push(format!("    - {} (Lvl {level} Q{quality})", gem.name));
        }
    }

    out.push("\n--- EQUIPPED ITEMS ---".to_string());
    for item in &context.build.items {
        out.push(format!("\n  Slot: {}", item.slot));
        out.push(format!(
            "    Name: {}, Base: {}, Rarity: {}",
            item.name,
            if item.base_type.is_empty() {
                "-"
            } else {
                &item.base_type
            },
            rarity_label(item.rarity),
        ));
        if !item.mods.is_empty() {
            out.push(format!("    Mods ({}):", item.mods.len()));
            for m in &item.mods {
                out.push(format!("      - {m}"));
            }
        }
    }

    out.push("\n--- PASSIVE TREE ---".to_string());
    out.push(format!(
        "Allocated Node IDs (count): {}",
        context.build.passives.len()
    ));

    let (patch_entries, entity_entries): (Vec<&EntityEntry>, Vec<&EntityEntry>) = context
        .entries
        .iter()
        .partition(|e| e.key.domain == SourceDomain::PatchNotes);

    out.push("\n--- ENRICHMENT DATA ---".to_string());
    for entry in entity_entries {
        render_entry(&mut out, entry);
    }

    if !patch_entries.is_empty() {
        out.push("\n--- LATEST PATCH NOTES ---".to_string());
        for entry in patch_entries {
            render_entry(&mut out, entry);
        }
    }

    out.push("\n### END OF BUILD DATA ###".to_string());
    out.join("\n")
}

fn rarity_label(rarity: ItemRarity) -> &'static str {
    match rarity {
        ItemRarity::Normal => "Normal",
        ItemRarity::Magic => "Magic",
        ItemRarity::Rare => "Rare",
        ItemRarity::Unique => "Unique",
        ItemRarity::Unknown => "Unknown",
    }
}

fn render_entry(out: &mut Vec<String>, entry: &EntityEntry) {
    out.push(format!("\n  Entity: {}", entry.key));
    if entry.unenriched {
        out.push("    (no data from any source)".to_string());
    }
    for record in &entry.records {
        let staleness = if record.stale { " [stale]" } else { "" };
        out.push(format!("    From {}{staleness}:", record.source));
        for (field, value) in &record.payload {
            if field == "source_url" {
                continue;
            }
            render_field(out, field, value);
        }
    }
    for failure in &entry.failures {
        out.push(format!("    ({}: {})", failure.source, failure.kind));
    }
}

fn render_field(out: &mut Vec<String>, field: &str, value: &Value) {
    match value {
        Value::String(s) if s.is_empty() => {}
        Value::String(s) => out.push(format!("      {field}: {s}")),
        Value::Array(items) if items.is_empty() => {}
        Value::Array(items) => {
            out.push(format!("      {field}:"));
            for item in items {
                match item {
                    Value::String(s) => out.push(format!("        - {s}")),
                    other => out.push(format!("        - {other}")),
                }
            }
        }
        Value::Null => {}
        other => out.push(format!("      {field}: {other}")),
    }
}
