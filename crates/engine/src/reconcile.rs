//! Last-write-wins merge of incident batches into the in-memory set.

use std::collections::HashMap;

use uwan_core::timestamp::parse_instant;
use uwan_core::{IncidentId, IncidentRecord};
use uwan_storage::retain_newest;

#[derive(Debug, Default)]
pub struct MergeResult {
    /// Merged set, newest first, capped.
    pub records: Vec<IncidentRecord>,
    /// Records whose id was not present before the merge.
    pub added: Vec<IncidentRecord>,
    pub updated: usize,
}

/// Replace when the incoming time is at least the existing one, or when the
/// existing time is unreadable. An unreadable incoming time never overwrites a
/// readable one.
pub fn should_replace(existing: &IncidentRecord, incoming: &IncidentRecord) -> bool {
    match (parse_instant(&existing.timestamp), parse_instant(&incoming.timestamp)) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(existing), Some(incoming)) => incoming >= existing,
    }
}

pub fn merge_incidents(
    current: &[IncidentRecord],
    incoming: impl IntoIterator<Item = IncidentRecord>,
    max_records: usize,
) -> MergeResult {
    let mut merged = current.to_vec();
    let mut index: HashMap<IncidentId, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, record)| (record.id.clone(), i))
        .collect();
    let mut added_ids = Vec::new();
    let mut updated = 0;

    for record in incoming {
        match index.get(&record.id) {
            Some(&i) => {
                if should_replace(&merged[i], &record) {
                    merged[i] = record;
                    updated += 1;
                }
            }
            None => {
                index.insert(record.id.clone(), merged.len());
                added_ids.push(record.id.clone());
                merged.push(record);
            }
        }
    }

    retain_newest(&mut merged, max_records);

    // New records evicted by the cap were never part of the set.
    let surviving: HashMap<&IncidentId, &IncidentRecord> = merged.iter().map(|r| (&r.id, r)).collect();
    let added = added_ids
        .iter()
        .filter_map(|id| surviving.get(id).map(|&r| r.clone()))
        .collect();

    MergeResult {
        records: merged,
        added,
        updated,
    }
}
