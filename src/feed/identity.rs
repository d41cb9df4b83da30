//! Re-locating a match group after refresh when its composite id has mutated.
//!
//! Group ids concatenate upstream sub-ids with `-` (e.g. `116811-321516-5489987`).
//! Sub-ids come and go between refreshes, so two ids refer to the same match
//! whenever they share at least one sub-id.

use super::types::MatchGroup;

/// Anything addressed by a composite group id.
pub trait GroupIdentified {
    /// The composite group id.
    fn group_id(&self) -> &str;
}

impl GroupIdentified for MatchGroup {
    fn group_id(&self) -> &str {
        &self.group_id
    }
}

/// Outcome of re-locating a group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GroupMatch<'a, T> {
    /// Same id as before.
    Exact(&'a T),
    /// Different id sharing at least one sub-id.
    Related(&'a T),
    /// Nothing left for this match.
    Vanished,
}

impl<'a, T> GroupMatch<'a, T> {
    /// The located group, if any.
    pub fn group(&self) -> Option<&'a T> {
        match *self {
            GroupMatch::Exact(g) | GroupMatch::Related(g) => Some(g),
            GroupMatch::Vanished => None,
        }
    }

    /// Whether the match disappeared.
    pub fn is_vanished(&self) -> bool {
        matches!(self, GroupMatch::Vanished)
    }
}

/// Sub-ids of a composite group id. Empty segments are dropped.
pub fn extract_group_id_numbers(group_id: &str) -> Vec<&str> {
    group_id
        .split('-')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

/// Whether two group ids share at least one sub-id.
///
/// Empty or all-separator ids never match anything.
pub fn share_group_id_number(a: &str, b: &str) -> bool {
    let left = extract_group_id_numbers(a);
    if left.is_empty() {
        return false;
    }
    let right = extract_group_id_numbers(b);
    left.iter().any(|part| right.contains(part))
}

/// Locate `target` in `groups`: exact id first, then the first group sharing a sub-id.
pub fn find_matching_group<'a, T: GroupIdentified>(target: &str, groups: &'a [T]) -> GroupMatch<'a, T> {
    if extract_group_id_numbers(target).is_empty() {
        return GroupMatch::Vanished;
    }

    if let Some(exact) = groups.iter().find(|g| g.group_id() == target) {
        return GroupMatch::Exact(exact);
    }

    groups
        .iter()
        .find(|g| share_group_id_number(target, g.group_id()))
        .map(GroupMatch::Related)
        .unwrap_or(GroupMatch::Vanished)
}
