//! Grouping helpers mirroring the upstream `ResourceRequestUtil` counting
//! utilities: requests are scored and placed individually but exchanged with
//! the caller grouped by identical `(resources_bundle, placement_constraints)`
//! with a count, per §6's external interface. `ResourceRequest` carries an
//! `f64`-valued bundle, so it has no total order and can't key a `BTreeMap`
//! (unlike `group_by_count`'s old, unused `ResourceMap`-keyed form) — grouping
//! is a linear scan against `PartialEq` instead.

use crate::types::ResourceRequest;

/// Groups a flat list of requests into `(request, count)` pairs, preserving
/// the first-seen order of each distinct request.
pub fn group_by_count(requests: Vec<ResourceRequest>) -> Vec<(ResourceRequest, u64)> {
    let mut grouped: Vec<(ResourceRequest, u64)> = Vec::new();
    'requests: for request in requests {
        for (existing, count) in grouped.iter_mut() {
            if *existing == request {
                *count += 1;
                continue 'requests;
            }
        }
        grouped.push((request, 1));
    }
    grouped
}

/// Expands `(request, count)` pairs back into a flat list, the inverse of
/// [`group_by_count`]. This is what `schedule()` calls before handing
/// requests to [`crate::demand::schedule_demand`], which places each request
/// independently.
pub fn ungroup(groups: Vec<(ResourceRequest, u64)>) -> Vec<ResourceRequest> {
    groups
        .into_iter()
        .flat_map(|(request, count)| std::iter::repeat(request).take(count as usize))
        .collect()
}
