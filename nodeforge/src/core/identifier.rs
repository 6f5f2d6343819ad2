//! Identifier generation policies.
//!
//! Two policies exist in the wild: human kebab-case names (`pdf-parser`) and
//! opaque unique tokens (UUID v4). A repository must use exactly one; the
//! active policy is configured once and checked against existing artifacts.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

static KEBAB_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("kebab regex"));

/// Longest generated kebab identifier.
const MAX_KEBAB_LEN: usize = 48;

/// How new identifiers are minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdPolicy {
    /// Human-readable kebab-case name.
    Kebab,
    /// Opaque UUID v4 token.
    Opaque,
}

impl fmt::Display for IdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdPolicy::Kebab => f.write_str("kebab"),
            IdPolicy::Opaque => f.write_str("opaque"),
        }
    }
}

/// Deployment-level policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySetting {
    /// Derive from existing identifiers, falling back to the default policy.
    #[default]
    Infer,
    Kebab,
    Opaque,
}

/// Identifier policy could not be settled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error(
        "repository mixes identifier policies (kebab: {}; opaque: {})",
        .kebab.join(", "),
        .opaque.join(", ")
    )]
    Mixed {
        kebab: Vec<String>,
        opaque: Vec<String>,
    },
    #[error("configured identifier policy '{configured}' contradicts existing artifacts ('{found}')")]
    Conflict { configured: IdPolicy, found: IdPolicy },
}

/// Classify an existing identifier by the policy that could have produced it.
///
/// UUIDs are checked first since they are also valid kebab strings.
pub fn classify(identifier: &str) -> Option<IdPolicy> {
    if is_opaque_token(identifier) {
        Some(IdPolicy::Opaque)
    } else if is_kebab(identifier) {
        Some(IdPolicy::Kebab)
    } else {
        None
    }
}

pub fn is_kebab(identifier: &str) -> bool {
    KEBAB_RE.is_match(identifier)
}

pub fn is_opaque_token(identifier: &str) -> bool {
    identifier.len() == 36 && Uuid::parse_str(identifier).is_ok()
}

/// Whether `identifier` could have been minted under `policy`.
pub fn conforms(policy: IdPolicy, identifier: &str) -> bool {
    match policy {
        IdPolicy::Kebab => is_kebab(identifier) && !is_opaque_token(identifier),
        IdPolicy::Opaque => is_opaque_token(identifier),
    }
}

/// Settle the active policy for a repository.
///
/// Identifiers matching neither policy are ignored.
pub fn resolve_policy<'a, I>(
    setting: PolicySetting,
    default: IdPolicy,
    existing: I,
) -> Result<IdPolicy, PolicyError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut kebab = Vec::new();
    let mut opaque = Vec::new();
    for identifier in existing {
        match classify(identifier) {
            Some(IdPolicy::Kebab) => kebab.push(identifier.to_string()),
            Some(IdPolicy::Opaque) => opaque.push(identifier.to_string()),
            None => {}
        }
    }

    let found = match (kebab.is_empty(), opaque.is_empty()) {
        (false, false) => {
            kebab.sort();
            opaque.sort();
            return Err(PolicyError::Mixed { kebab, opaque });
        }
        (false, true) => Some(IdPolicy::Kebab),
        (true, false) => Some(IdPolicy::Opaque),
        (true, true) => None,
    };

    match (setting, found) {
        (PolicySetting::Infer, Some(found)) => Ok(found),
        (PolicySetting::Infer, None) => Ok(default),
        (PolicySetting::Kebab, found) => explicit(IdPolicy::Kebab, found),
        (PolicySetting::Opaque, found) => explicit(IdPolicy::Opaque, found),
    }
}

fn explicit(configured: IdPolicy, found: Option<IdPolicy>) -> Result<IdPolicy, PolicyError> {
    match found {
        Some(found) if found != configured => Err(PolicyError::Conflict { configured, found }),
        _ => Ok(configured),
    }
}

/// Lower-case `raw`, collapsing every run of non-alphanumerics into one `-`.
pub fn kebab_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Mint a new identifier under `policy`, avoiding every id in `taken`.
pub fn mint(policy: IdPolicy, name_hint: &str, taken: &BTreeSet<String>) -> String {
    match policy {
        IdPolicy::Opaque => loop {
            let token = Uuid::new_v4().to_string();
            if !taken.contains(&token) {
                return token;
            }
        },
        IdPolicy::Kebab => {
            let mut base = kebab_case(name_hint);
            if base.len() > MAX_KEBAB_LEN {
                base.truncate(MAX_KEBAB_LEN);
                base = base.trim_end_matches('-').to_string();
            }
            if base.is_empty() {
                base = "untitled".to_string();
            }
            if !taken.contains(&base) {
                return base;
            }
            (2..)
                .map(|n| format!("{base}-{n}"))
                .find(|candidate| !taken.contains(candidate))
                .unwrap_or(base)
        }
    }
}

/// Human label for a kebab name (`pdf-parser` -> `Pdf Parser`).
pub fn label_from_name(name: &str) -> String {
    kebab_case(name)
        .split('-')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "550e8400-e29b-41d4-a716-446655440000";

    #[test]
    fn classifies_uuid_before_kebab() {
        assert_eq!(classify(UUID), Some(IdPolicy::Opaque));
        assert_eq!(classify("pdf-parser-123"), Some(IdPolicy::Kebab));
        assert_eq!(classify("PDF Parser"), None);
        assert!(!conforms(IdPolicy::Kebab, UUID));
    }

    #[test]
    fn infer_follows_existing_artifacts() {
        let got = resolve_policy(PolicySetting::Infer, IdPolicy::Kebab, [UUID]).expect("policy");
        assert_eq!(got, IdPolicy::Opaque);
        let got =
            resolve_policy(PolicySetting::Infer, IdPolicy::Opaque, ["pdf-parser"]).expect("policy");
        assert_eq!(got, IdPolicy::Kebab);
    }

    #[test]
    fn infer_uses_default_for_empty_repository() {
        let got = resolve_policy(PolicySetting::Infer, IdPolicy::Kebab, []).expect("policy");
        assert_eq!(got, IdPolicy::Kebab);
    }

    #[test]
    fn mixed_repository_is_reported() {
        let err = resolve_policy(PolicySetting::Infer, IdPolicy::Kebab, ["pdf-parser", UUID])
            .expect_err("mixed");
        assert!(matches!(err, PolicyError::Mixed { .. }));
    }

    #[test]
    fn explicit_setting_must_match_repository() {
        let err = resolve_policy(PolicySetting::Kebab, IdPolicy::Kebab, [UUID]).expect_err("conflict");
        assert_eq!(
            err,
            PolicyError::Conflict {
                configured: IdPolicy::Kebab,
                found: IdPolicy::Opaque
            }
        );
        let got = resolve_policy(PolicySetting::Opaque, IdPolicy::Kebab, []).expect("policy");
        assert_eq!(got, IdPolicy::Opaque);
    }

    #[test]
    fn kebab_case_collapses_separators() {
        assert_eq!(kebab_case("  PDF  Text__Extractor!! "), "pdf-text-extractor");
        assert_eq!(kebab_case("--"), "");
    }

    #[test]
    fn mint_avoids_taken_names() {
        let taken: BTreeSet<String> = ["pdf-parser".to_string(), "pdf-parser-2".to_string()]
            .into_iter()
            .collect();
        assert_eq!(mint(IdPolicy::Kebab, "PDF Parser", &taken), "pdf-parser-3");
        assert_eq!(mint(IdPolicy::Kebab, "", &taken), "untitled");
        assert!(is_opaque_token(&mint(IdPolicy::Opaque, "ignored", &taken)));
    }

    #[test]
    fn labels_title_case_names() {
        assert_eq!(label_from_name("pdf-text-extractor"), "Pdf Text Extractor");
    }
}
