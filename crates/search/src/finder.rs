//! Rule evaluation.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use mailsift_extract::{DocumentPart, Person};
use mailsift_index::{ClusterStore, Role};

use crate::error::{Result, SearchError};
use crate::render::{render_all, sort_chronologically, RenderedEmail};

/// Whether a role must, must not, or may hold for a rule's cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Yes,
    No,
    #[default]
    Any,
}

impl FromStr for Presence {
    type Err = SearchError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(Presence::Yes),
            "no" => Ok(Presence::No),
            "any" | "" => Ok(Presence::Any),
            _ => Err(SearchError::BadPresence(raw.to_string())),
        }
    }
}

/// One rule: a cluster id and a presence requirement for each role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRule {
    pub cluster_id: String,
    #[serde(default)]
    pub from: Presence,
    #[serde(default)]
    pub to: Presence,
    #[serde(default)]
    pub body: Presence,
}

impl SearchRule {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            ..Self::default()
        }
    }
}

impl FromStr for SearchRule {
    type Err = SearchError;

    /// Compact form used on the command line:
    /// `CLUSTER_ID[:from=yes,to=no,body=any]`. Unnamed roles stay `any`.
    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let (id, constraints) = match trimmed.split_once(':') {
            Some((id, rest)) => (id.trim(), rest.trim()),
            None => (trimmed, ""),
        };
        if id.is_empty() {
            return Err(SearchError::BadRule(raw.to_string()));
        }
        let mut rule = SearchRule::new(id);
        if constraints.is_empty() {
            return Ok(rule);
        }
        for clause in constraints.split(',') {
            let Some((role, presence)) = clause.split_once('=') else {
                return Err(SearchError::BadRule(raw.to_string()));
            };
            let presence: Presence = presence.parse()?;
            match role.trim().to_ascii_lowercase().as_str() {
                "from" => rule.from = presence,
                "to" | "cc" | "bcc" | "recipient" | "recipients" => rule.to = presence,
                "body" => rule.body = presence,
                other => return Err(SearchError::BadRole(other.to_string())),
            }
        }
        Ok(rule)
    }
}

/// Role names accepted on the command line. The legacy recipient
/// spellings `to`, `cc`, `bcc` and `recipients` all normalize to
/// [`Role::Recipient`].
pub fn parse_role(raw: &str) -> Result<Role> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "from" => Ok(Role::From),
        "to" | "cc" | "bcc" | "recipient" | "recipients" => Ok(Role::Recipient),
        "body" => Ok(Role::Body),
        other => Err(SearchError::BadRole(other.to_string())),
    }
}

/// Evaluates rule sets against one job's cluster store and parts.
pub struct Finder<'a> {
    store: &'a ClusterStore,
    parts: &'a BTreeMap<String, DocumentPart>,
}

impl<'a> Finder<'a> {
    pub fn new(store: &'a ClusterStore, parts: &'a BTreeMap<String, DocumentPart>) -> Self {
        Self { store, parts }
    }

    /// Parts matching every rule, oldest first.
    ///
    /// Each rule narrows a copy of the full part universe by its three
    /// role requirements; rule results are then intersected. A rule
    /// naming an unknown cluster short-circuits to an empty result.
    pub fn find(&self, rules: &[SearchRule]) -> Vec<&'a DocumentPart> {
        let mut candidates: BTreeSet<&str> = self.parts.keys().map(String::as_str).collect();
        for rule in rules {
            if self.store.get(&rule.cluster_id).is_none() {
                log::debug!("rule names unknown cluster {:?}", rule.cluster_id);
                return Vec::new();
            }
            let matched = self.rule_candidates(rule);
            candidates = candidates.intersection(&matched).copied().collect();
            if candidates.is_empty() {
                break;
            }
        }
        let mut found: Vec<&DocumentPart> = candidates
            .iter()
            .filter_map(|id| self.parts.get(*id))
            .collect();
        sort_chronologically(&mut found);
        found
    }

    /// Mail involving one cluster, oldest first, rendered the same way
    /// as search hits. An optional role narrows to parts where a member
    /// holds that role; an optional limit caps the result after
    /// sorting. `None` when the cluster id is unknown.
    pub fn cluster_emails(
        &self,
        cluster_id: &str,
        role: Option<Role>,
        limit: Option<usize>,
    ) -> Option<Vec<RenderedEmail>> {
        self.store.get(cluster_id)?;
        let part_ids = self.store.cluster_part_ids(cluster_id, role);
        let mut found: Vec<&DocumentPart> = part_ids
            .iter()
            .filter_map(|id| self.parts.get(id))
            .collect();
        sort_chronologically(&mut found);
        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Some(render_all(&found))
    }

    fn rule_candidates(&self, rule: &SearchRule) -> BTreeSet<&'a str> {
        let mut candidates: BTreeSet<&'a str> =
            self.parts.keys().map(String::as_str).collect();
        for (role, presence) in [
            (Role::From, rule.from),
            (Role::Recipient, rule.to),
            (Role::Body, rule.body),
        ] {
            let role_set = match presence {
                Presence::Any => continue,
                _ => self.role_set(&rule.cluster_id, role),
            };
            let keep_if_present = presence == Presence::Yes;
            candidates.retain(|id| role_set.contains(*id) == keep_if_present);
        }
        candidates
    }

    /// Part ids where any member of the cluster holds `role`. Clusters
    /// persisted without postings fall back to case-insensitive
    /// substring containment against the rendered headers and body.
    fn role_set(&self, cluster_id: &str, role: Role) -> BTreeSet<&'a str> {
        let Some(cluster) = self.store.get(cluster_id) else {
            return BTreeSet::new();
        };
        if cluster.postings.is_empty() {
            return self.containment_set(&cluster.members, role);
        }
        cluster
            .postings
            .iter()
            .filter(|posting| posting.role == role)
            .map(|posting| posting.part_id.as_str())
            .collect()
    }

    fn containment_set(&self, members: &[String], role: Role) -> BTreeSet<&'a str> {
        let needles: Vec<String> = members
            .iter()
            .map(|member| member.to_lowercase())
            .filter(|member| !member.is_empty())
            .collect();
        if needles.is_empty() {
            return BTreeSet::new();
        }
        let mut matched = BTreeSet::new();
        for (part_id, part) in self.parts {
            let haystack = match role {
                Role::From => part.from.display(),
                Role::Recipient => part
                    .recipients
                    .iter()
                    .map(Person::display)
                    .collect::<Vec<_>>()
                    .join(", "),
                Role::Body => part.body_text.clone(),
            }
            .to_lowercase();
            if needles.iter().any(|needle| haystack.contains(needle)) {
                matched.insert(part_id.as_str());
            }
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn presence_parses_case_insensitively() {
        assert_eq!("YES".parse::<Presence>().expect("parse"), Presence::Yes);
        assert_eq!("no".parse::<Presence>().expect("parse"), Presence::No);
        assert_eq!("".parse::<Presence>().expect("parse"), Presence::Any);
        assert!("maybe".parse::<Presence>().is_err());
    }

    #[test]
    fn compact_rules_parse() {
        let rule: SearchRule = "abc123def456:from=yes,to=no".parse().expect("parse");
        assert_eq!(rule.cluster_id, "abc123def456");
        assert_eq!(rule.from, Presence::Yes);
        assert_eq!(rule.to, Presence::No);
        assert_eq!(rule.body, Presence::Any);

        let bare: SearchRule = "abc123def456".parse().expect("parse");
        assert_eq!(bare.from, Presence::Any);
    }

    #[test]
    fn recipient_spellings_all_set_the_to_role() {
        for alias in ["to", "cc", "bcc", "recipient", "recipients"] {
            let rule: SearchRule = format!("abc123def456:{alias}=yes")
                .parse()
                .expect("parse");
            assert_eq!(rule.to, Presence::Yes, "alias {alias}");
        }
    }

    #[test]
    fn roles_parse_with_legacy_aliases() {
        assert_eq!(parse_role("from").expect("parse"), Role::From);
        assert_eq!(parse_role("BCC").expect("parse"), Role::Recipient);
        assert_eq!(parse_role(" body ").expect("parse"), Role::Body);
        assert!(parse_role("subject").is_err());
    }

    #[test]
    fn malformed_rules_are_rejected() {
        assert!(":from=yes".parse::<SearchRule>().is_err());
        assert!("abc:subject=yes".parse::<SearchRule>().is_err());
        assert!("abc:from".parse::<SearchRule>().is_err());
        assert!("abc:from=maybe".parse::<SearchRule>().is_err());
    }
}
