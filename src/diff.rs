use crate::model::Item;
use std::collections::HashSet;

/// Items of `observed` whose id is not in `existing_ids`. Pure set difference
/// by id; the output carries no ordering guarantee. An empty `existing_ids`
/// yields all of `observed` — the first-run bootstrap treats everything as new.
pub fn compute_new(observed: &[Item], existing_ids: &HashSet<String>) -> Vec<Item> {
    observed
        .iter()
        .filter(|item| !existing_ids.contains(&item.id))
        .cloned()
        .collect()
}
