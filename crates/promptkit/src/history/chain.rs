//! Chain derivation over the flat record list.
//!
//! Pure functions; no storage access. The record list is the only source of
//! truth, so every chain view is recomputed from it.

use crate::domain::{PromptRecord, PromptRecordChain};
use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Builds the chain `chain_id` from `records`.
///
/// # Errors
///
/// - [`Error::ChainNotFound`] if no record belongs to the chain
/// - [`Error::Corrupted`] if the chain has no version-1 record
pub fn build_chain(records: &[PromptRecord], chain_id: &str) -> Result<PromptRecordChain> {
    let versions: Vec<PromptRecord> = records
        .iter()
        .filter(|r| r.chain_id == chain_id)
        .cloned()
        .collect();
    from_versions(chain_id, versions)
}

fn from_versions(chain_id: &str, mut versions: Vec<PromptRecord>) -> Result<PromptRecordChain> {
    versions.sort_by_key(|r| r.version);

    let Some(current) = versions.last().cloned() else {
        return Err(Error::ChainNotFound(chain_id.to_string()));
    };
    let Some(root) = versions.iter().find(|r| r.version == 1).cloned() else {
        return Err(Error::Corrupted {
            chain_id: chain_id.to_string(),
            reason: "no version 1 record".to_string(),
        });
    };

    Ok(PromptRecordChain {
        chain_id: chain_id.to_string(),
        root_record: root,
        current_record: current,
        versions,
    })
}

/// Groups `records` into chains, most recently updated chain first.
///
/// Chains without a root are skipped with a warning rather than failing the
/// whole listing.
#[must_use]
pub fn group_chains(records: &[PromptRecord]) -> Vec<PromptRecordChain> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<PromptRecord>> = HashMap::new();
    for record in records {
        let group = groups.entry(record.chain_id.as_str()).or_insert_with(|| {
            order.push(record.chain_id.as_str());
            Vec::new()
        });
        group.push(record.clone());
    }

    let mut chains: Vec<PromptRecordChain> = order
        .into_iter()
        .filter_map(|chain_id| {
            let versions = groups.remove(chain_id).unwrap_or_default();
            match from_versions(chain_id, versions) {
                Ok(chain) => Some(chain),
                Err(e) => {
                    warn!(chain_id, error = %e, "Skipping inconsistent chain");
                    None
                }
            }
        })
        .collect();

    chains.sort_by(|a, b| b.current_record.timestamp.cmp(&a.current_record.timestamp));
    chains
}

/// Follows `previous_id` links back from `record_id`, returning the lineage
/// root-first.
///
/// Stops quietly at a missing predecessor (it may have been evicted) or at a
/// record already visited. An unknown `record_id` yields an empty list.
#[must_use]
pub fn walk_iteration_chain(records: &[PromptRecord], record_id: &str) -> Vec<PromptRecord> {
    let by_id: HashMap<&str, &PromptRecord> =
        records.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut lineage = Vec::new();
    let mut visited = HashSet::new();
    let mut next = by_id.get(record_id).copied();
    while let Some(record) = next {
        if !visited.insert(record.id.as_str()) {
            warn!(record_id = %record.id, "Cycle in previousId links; stopping");
            break;
        }
        lineage.push(record.clone());
        next = record
            .previous_id
            .as_deref()
            .and_then(|prev| by_id.get(prev).copied());
    }

    lineage.reverse();
    lineage
}
