//! Structural guardrails applied after classifier acceptance.
//!
//! Every scored edge must also pass the deterministic shape check for
//! its pair type before it reaches the graph. Forced header edges
//! bypass this module entirely.

use crate::name::ParsedName;
use crate::nickname::same_nickname_group;
use crate::normalize::{is_email, split_email};

/// Whether a classifier-accepted edge between `a` and `b` may be added.
pub fn edge_allowed(a: &str, b: &str, pa: &ParsedName, pb: &ParsedName) -> bool {
    match (is_email(a), is_email(b)) {
        (true, true) => a.trim().to_lowercase() == b.trim().to_lowercase(),
        (true, false) => name_in_local(&split_email(a).0, pb),
        (false, true) => name_in_local(&split_email(b).0, pa),
        (false, false) => names_compatible(pa, pb),
    }
}

/// The name's last name, or a first+last concatenation (full, initialed
/// first, initialed last), must literally appear in the local part.
fn name_in_local(local: &str, name: &ParsedName) -> bool {
    let last = name.last.replace('.', "");
    if last.is_empty() {
        return false;
    }
    if local.contains(&last) {
        return true;
    }
    let first = name.first.replace('.', "");
    if first.is_empty() {
        return false;
    }
    let fi: String = first.chars().take(1).collect();
    let li: String = last.chars().take(1).collect();
    local.contains(&format!("{first}{last}"))
        || local.contains(&format!("{fi}{last}"))
        || local.contains(&format!("{first}{li}"))
}

/// Equal last names plus an agreeing first name, first initial or
/// nickname group.
fn names_compatible(pa: &ParsedName, pb: &ParsedName) -> bool {
    if pa.last.is_empty() || pb.last.is_empty() || pa.last != pb.last {
        return false;
    }
    let first_equal = !pa.first.is_empty() && pa.first == pb.first;
    let initial_equal = matches!(
        (pa.first_initial(), pb.first_initial()),
        (Some(x), Some(y)) if x == y
    );
    first_equal || initial_equal || same_nickname_group(&pa.first, &pb.first)
}
