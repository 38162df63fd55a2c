//! Search-query derivation from catalog product names.
//!
//! Retailer search endpoints choke on punctuation and overly long strings,
//! and bare unit names ("Intercessors") pull in unrelated hits, so queries
//! are cleaned, disambiguated with the game-system keyword and capped to
//! the transport's length limit.

/// Appended to unit names so marketplace searches stay on-topic.
const DISAMBIGUATOR: &str = "warhammer";

/// Paint and hobby-supply ranges where the brand name alone is already an
/// unambiguous query; appending the game keyword only hurts recall.
const BRAND_TERMS: &[&str] = &[
    "citadel",
    "vallejo",
    "army painter",
    "games workshop paint",
    "technical paint",
    "shade paint",
    "contrast paint",
];

/// Derive a clean search string from a product display name.
///
/// Strips everything but letters, digits, whitespace and apostrophes,
/// collapses whitespace, appends the disambiguator when missing and
/// truncates to `max_len` at a whole-word boundary.
pub fn build_query(product_name: &str, max_len: usize) -> String {
    let cleaned: String = product_name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    let lower = cleaned.to_lowercase();
    let query = if BRAND_TERMS.iter().any(|term| lower.contains(term)) {
        cleaned
    } else if lower.contains(DISAMBIGUATOR) {
        cleaned
    } else {
        format!("{cleaned} {DISAMBIGUATOR}")
    };

    truncate_at_word(&query, max_len)
}

/// Cut at the last whole-word boundary at or before `max_len` bytes. Falls
/// back to a hard cut on the nearest char boundary when a single word
/// overruns the limit.
fn truncate_at_word(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let cut = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= max_len)
        .last()
        .unwrap_or(0);
    let head = &s[..cut];
    match head.rfind(' ') {
        Some(space) if space > 0 => head[..space].trim_end().to_string(),
        _ => head.trim_end().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_disambiguator_and_strips_punctuation() {
        let q = build_query("Space Marine Intercessors!", 80);
        assert_eq!(q, "Space Marine Intercessors warhammer");
    }

    #[test]
    fn deterministic_across_calls() {
        let a = build_query("Space Marine Intercessors", 50);
        let b = build_query("Space Marine Intercessors", 50);
        assert_eq!(a, b);
        assert!(a.len() <= 50);
        assert!(a.chars().all(|c| c.is_alphanumeric() || c == ' ' || c == '\''));
    }

    #[test]
    fn keeps_apostrophes() {
        let q = build_query("Kharadron Overlords: Brokk Grungsson's Gunhauler", 80);
        assert!(q.contains("Grungsson's"));
    }

    #[test]
    fn brand_term_passes_through_unsuffixed() {
        let q = build_query("Citadel Colour: Abaddon Black (Base)", 80);
        assert_eq!(q, "Citadel Colour Abaddon Black Base");
        assert!(!q.to_lowercase().contains("warhammer"));
    }

    #[test]
    fn does_not_double_suffix() {
        let q = build_query("Warhammer 40,000: Leviathan", 80);
        assert_eq!(q, "Warhammer 40 000 Leviathan");
    }

    #[test]
    fn truncates_at_word_boundary() {
        let q = build_query("Adeptus Mechanicus Serberys Raiders Sulphurhounds Squadron Box", 50);
        assert!(q.len() <= 50);
        assert!(!q.ends_with(' '));
        // never cuts a word in half
        assert!("Adeptus Mechanicus Serberys Raiders Sulphurhounds Squadron Box warhammer"
            .starts_with(&q));
        assert!(q.split(' ').all(|w| {
            "Adeptus Mechanicus Serberys Raiders Sulphurhounds Squadron Box warhammer"
                .split(' ')
                .any(|orig| orig == w)
        }));
    }

    #[test]
    fn collapses_whitespace_runs() {
        let q = build_query("  Necron   Warriors  ", 80);
        assert_eq!(q, "Necron Warriors warhammer");
    }
}
