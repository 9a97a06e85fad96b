//! Assembles the final context from a decoded build and the coordination
//! results. Pure: no I/O, no clock reads beyond the timestamp handed in.

use chrono::{DateTime, Utc};

use buildlens_shared::types::{BuildDescription, EnrichedContext, EntityEntry, LookupKey};

use crate::coordinator::Resolved;

/// Merge per-source records and failure annotations into one context.
///
/// Entry order follows extraction order exactly. Every extracted key gets
/// an entry, including keys nothing resolved for; those come back with no
/// records, no failures, and the unenriched flag set.
pub fn merge_context(
    build: BuildDescription,
    keys: &[LookupKey],
    mut resolved: Resolved,
    generated_at: DateTime<Utc>,
) -> EnrichedContext {
    let entries = keys
        .iter()
        .map(|key| {
            let records = resolved.records.remove(key).unwrap_or_default();
            let failures = resolved.failures.remove(key).unwrap_or_default();
            EntityEntry::new(key.clone(), records, failures)
        })
        .collect();

    EnrichedContext {
        build,
        entries,
        generated_at,
        partial: resolved.timed_out,
    }
}
