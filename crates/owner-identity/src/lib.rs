//! Deterministic owner-key derivation for Form 4 reporting owners.
//!
//! Prefers a normalized CIK; falls back to a hash of a normalized name; flags
//! entity-name guesses so downstream consumers can tell a probable fund/trust from
//! a probable individual without fuzzy matching.

use insider_core::hashing::sha256_hex;
use unicode_normalization::UnicodeNormalization;

const SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v", "md", "phd", "cpa", "esq"];

const ENTITY_TOKENS: &[&str] = &[
    "llc",
    "inc",
    "ltd",
    "lp",
    "llp",
    "plc",
    "corp",
    "corporation",
    "company",
    "co",
    "partners",
    "holdings",
    "trust",
    "foundation",
    "capital",
    "management",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerIdentity {
    pub owner_key: String,
    pub owner_cik: Option<String>,
    pub owner_name_raw: Option<String>,
    pub owner_name_normalized: Option<String>,
    pub owner_name_hash: Option<String>,
    pub is_entity_name_guess: bool,
}

/// Normalize an owner CIK: digits only, left-padded to 10. `None` if the input is
/// blank or contains no digits at all.
pub fn normalize_cik(owner_cik: Option<&str>) -> Option<String> {
    let s = owner_cik?.trim();
    if s.is_empty() {
        return None;
    }
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    Some(format!("{:0>10}", digits))
}

fn basic_name_norm(s: &str) -> String {
    let nfkc: String = s.nfkc().collect();
    let nfkc = nfkc.replace('\u{00a0}', " ");
    let lower = nfkc.to_lowercase();

    let mut out = String::with_capacity(lower.len());
    let mut last_was_space = false;
    for ch in lower.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize an owner name for hashing. Returns `(normalized_name, is_entity_guess)`.
///
/// Conservative by design: no fuzzy matching, only a fixed comma-swap rule for
/// "LAST, FIRST M" style SEC filer names and a fixed honorific-suffix strip.
pub fn normalize_owner_name(owner_name_raw: Option<&str>) -> (Option<String>, bool) {
    let raw = match owner_name_raw.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => return (None, false),
    };

    let s = if let Some((left, right)) = raw.split_once(',') {
        let left_n = basic_name_norm(left);
        let right_n = basic_name_norm(right);
        if !left_n.is_empty() && !right_n.is_empty() {
            format!("{} {}", right_n, left_n)
        } else {
            basic_name_norm(raw)
        }
    } else {
        basic_name_norm(raw)
    };

    if s.is_empty() {
        return (None, false);
    }

    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    while let Some(last) = tokens.last() {
        if SUFFIXES.contains(last) {
            tokens.pop();
        } else {
            break;
        }
    }

    let is_entity_guess = tokens.iter().any(|t| ENTITY_TOKENS.contains(t));
    let normalized = tokens.join(" ");

    if normalized.is_empty() {
        (None, is_entity_guess)
    } else {
        (Some(normalized), is_entity_guess)
    }
}

/// Build the canonical owner identity used as the second leg of an event key.
///
/// 1. CIK present → owner_key is the zero-padded CIK.
/// 2. Else a normalizable name → owner_key is `namehash:<sha256(normalized)>`.
/// 3. Else → owner_key is `unknown:<sha256("unknown_owner")>`.
pub fn build_owner_identity(owner_cik: Option<&str>, owner_name_raw: Option<&str>) -> OwnerIdentity {
    if let Some(cik) = normalize_cik(owner_cik) {
        let (norm_name, is_entity) = normalize_owner_name(owner_name_raw);
        let name_hash = norm_name.as_deref().map(sha256_hex);
        return OwnerIdentity {
            owner_key: cik.clone(),
            owner_cik: Some(cik),
            owner_name_raw: owner_name_raw.map(str::to_string),
            owner_name_normalized: norm_name,
            owner_name_hash: name_hash,
            is_entity_name_guess: is_entity,
        };
    }

    let (norm_name, is_entity) = normalize_owner_name(owner_name_raw);
    if let Some(norm_name) = norm_name {
        let name_hash = sha256_hex(&norm_name);
        return OwnerIdentity {
            owner_key: format!("namehash:{}", name_hash),
            owner_cik: None,
            owner_name_raw: owner_name_raw.map(str::to_string),
            owner_name_normalized: Some(norm_name),
            owner_name_hash: Some(name_hash),
            is_entity_name_guess: is_entity,
        };
    }

    OwnerIdentity {
        owner_key: format!("unknown:{}", sha256_hex("unknown_owner")),
        owner_cik: None,
        owner_name_raw: owner_name_raw.map(str::to_string),
        owner_name_normalized: None,
        owner_name_hash: None,
        is_entity_name_guess: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_cik_pads_and_strips_non_digits() {
        assert_eq!(normalize_cik(Some("1234")), Some("0000001234".to_string()));
        assert_eq!(normalize_cik(Some(" 0000012345 ")), Some("0000012345".to_string()));
        assert_eq!(normalize_cik(Some("CIK-99")), Some("0000000099".to_string()));
        assert_eq!(normalize_cik(Some("")), None);
        assert_eq!(normalize_cik(None), None);
    }

    #[test]
    fn comma_swap_handles_last_first_middle() {
        let (norm, is_entity) = normalize_owner_name(Some("Smith, John Q."));
        assert_eq!(norm.as_deref(), Some("john q smith"));
        assert!(!is_entity);
    }

    #[test]
    fn suffix_is_stripped_only_from_end() {
        let (norm, _) = normalize_owner_name(Some("Smith, John Jr."));
        assert_eq!(norm.as_deref(), Some("john smith"));
    }

    #[test]
    fn entity_token_is_flagged() {
        let (norm, is_entity) = normalize_owner_name(Some("Vanguard Capital Partners LLC"));
        assert_eq!(norm.as_deref(), Some("vanguard capital partners llc"));
        assert!(is_entity);
    }

    #[test]
    fn cik_wins_over_name() {
        let id = build_owner_identity(Some("42"), Some("Doe, Jane"));
        assert_eq!(id.owner_key, "0000000042");
        assert_eq!(id.owner_cik.as_deref(), Some("0000000042"));
        assert_eq!(id.owner_name_normalized.as_deref(), Some("jane doe"));
    }

    #[test]
    fn namehash_fallback_when_no_cik() {
        let id = build_owner_identity(None, Some("Doe, Jane"));
        assert!(id.owner_key.starts_with("namehash:"));
        assert_eq!(id.owner_key.len(), "namehash:".len() + 64);
    }

    #[test]
    fn unknown_fallback_when_nothing_present() {
        let id = build_owner_identity(None, None);
        assert!(id.owner_key.starts_with("unknown:"));
    }
}
