//! Name and email canonicalization plus the "is this me" predicate.
//!
//! Everything here is total over strings. Blank input yields an empty form
//! and an empty token set, which never matches anything.

use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Filler words accepted in a candidate name that otherwise names the owner
/// ("Alex (me)", "You").
const SELF_FILLERS: [&str; 3] = ["you", "me", "myself"];

/// Trim, collapse inner whitespace and lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Word tokens with diacritics stripped and case folded.
pub fn tokenize(name: &str) -> BTreeSet<String> {
    let folded: String = name
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    folded.unicode_words().map(str::to_string).collect()
}

/// Whether `candidate` names the owner, given the owner's member name and
/// account display name.
pub fn looks_like_self(candidate: &str, current_user_name: &str, account_display_name: &str) -> bool {
    let candidate = tokenize(candidate);
    if candidate.is_empty() {
        return false;
    }
    let mut own = tokenize(current_user_name);
    own.extend(tokenize(account_display_name));
    if own.is_empty() || candidate.is_disjoint(&own) {
        return false;
    }
    candidate
        .iter()
        .all(|t| own.contains(t) || SELF_FILLERS.contains(&t.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_fold_case_and_whitespace() {
        assert_eq!(normalize_name("  Ana   María \t Ruiz "), "ana maría ruiz");
        assert_eq!(normalize_name("   "), "");
        assert_eq!(normalize_email(" Bo@Example.COM "), "bo@example.com");
    }

    #[test]
    fn tokens_ignore_diacritics_and_punctuation() {
        let t = tokenize("José-María  O'Neil");
        assert!(t.contains("jose"));
        assert!(t.contains("maria"));
        assert!(tokenize("  ").is_empty());
        assert_eq!(tokenize("ÉLODIE"), tokenize("elodie"));
    }

    #[test]
    fn owner_name_variants_look_like_self() {
        assert!(looks_like_self("Alex", "Alex Kim", "alex.k"));
        assert!(looks_like_self("alex kim (me)", "Alex Kim", ""));
        assert!(looks_like_self("Kim", "", "Alex Kim"));
        assert!(looks_like_self("Zoë", "Zoe", ""));
    }

    #[test]
    fn other_people_do_not_look_like_self() {
        assert!(!looks_like_self("Alex Jones", "Alex Kim", ""));
        assert!(!looks_like_self("Sam", "Alex Kim", "Alex"));
        // only filler tokens: disjoint from the owner
        assert!(!looks_like_self("me", "Alex Kim", ""));
        assert!(!looks_like_self("", "Alex Kim", ""));
        assert!(!looks_like_self("Alex", "", "  "));
    }
}
