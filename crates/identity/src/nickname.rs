//! Nickname equivalence groups for first names.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Hand-curated alias groups. The john/jonathan conflation is
/// corpus-dependent; drop it if your archive treats them as distinct.
static GROUPS: &[&[&str]] = &[
    &["elizabeth", "liz", "beth", "eliza", "betty", "liza", "lisa"],
    &["alexander", "alex", "sandy", "xander"],
    &["anthony", "tony"],
    &["andrew", "andy", "drew"],
    &["margaret", "maggie", "meg", "peggy"],
    &["jonathan", "jon", "john", "johnny"],
    &["christopher", "chris"],
    &["patricia", "pat", "patti", "trish"],
    &["rebecca", "becky", "becca", "bex"],
    &["sharon", "shaz", "sheri"],
    &["david", "dave", "davey"],
];

static ALIAS_TO_GROUP: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for (group, aliases) in GROUPS.iter().enumerate() {
        for alias in *aliases {
            map.insert(*alias, group);
        }
    }
    map
});

/// Group id for a lowercased first name, if it belongs to a known
/// nickname group.
pub fn nickname_group(first: &str) -> Option<usize> {
    ALIAS_TO_GROUP.get(first).copied()
}

/// Whether two first names are aliases of the same canonical name.
pub fn same_nickname_group(a: &str, b: &str) -> bool {
    matches!(
        (nickname_group(a), nickname_group(b)),
        (Some(ga), Some(gb)) if ga == gb
    )
}
