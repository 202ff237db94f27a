//! # Delta Merger
//!
//! Folds every delta of one key within a batch into a single delta.
//!
//! - Numeric fields are summed (order-independent).
//! - Source position is the one with the highest offset.
//! - Deltas the current row already reflects (same topic partition, offset at
//!   or below the row's last offset) are dropped, so a redelivered batch does
//!   not count twice.
//! - A merged delta that sums to zero is dropped when no row exists for the
//!   key; against an existing row it is kept so the row's lineage advances.

use shared_types::Address;
use std::collections::HashMap;

use crate::domain::{SummaryDelta, SummaryFields, SummarySnapshot};

/// Merge the deltas of one key.
///
/// All `deltas` must share the same key. Returns `None` when there is
/// nothing to apply.
pub fn merge_deltas(
    deltas: &[SummaryDelta],
    current_snapshots: &HashMap<Address, SummarySnapshot>,
) -> Option<SummaryDelta> {
    let first = deltas.first()?;
    let current = current_snapshots.get(&first.key);

    let pending: Vec<&SummaryDelta> = deltas
        .iter()
        .filter(|d| current.map_or(true, |row| !row.already_reflects(&d.source)))
        .collect();

    let latest = pending.iter().max_by_key(|d| d.source.offset)?;
    let fields: SummaryFields = pending.iter().map(|d| d.fields).sum();
    let activity_time = pending
        .iter()
        .map(|d| d.activity_time)
        .max()
        .unwrap_or(latest.activity_time);

    let merged = SummaryDelta::new(first.key, fields, latest.source.clone(), activity_time);
    if merged.is_noop() && current.is_none() {
        return None;
    }
    Some(merged)
}

/// Group `deltas` by key and merge each group.
pub fn merge_batch(
    deltas: Vec<SummaryDelta>,
    current_snapshots: &HashMap<Address, SummarySnapshot>,
) -> HashMap<Address, SummaryDelta> {
    let mut grouped: HashMap<Address, Vec<SummaryDelta>> = HashMap::new();
    for delta in deltas {
        grouped.entry(delta.key).or_default().push(delta);
    }

    grouped
        .into_iter()
        .filter_map(|(key, group)| {
            merge_deltas(&group, current_snapshots).map(|merged| (key, merged))
        })
        .collect()
}
