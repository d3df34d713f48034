//! Lookup key formats
//!
//! The store never interprets lookup keys itself; the caller supplies a
//! format that validates and normalizes what the user typed.

/// Validates and normalizes a registry lookup key
pub trait LookupKeyFormat: Send + Sync {
    /// Normalized key, or `None` when `raw` is malformed
    fn normalize(&self, raw: &str) -> Option<String>;
}

/// Any predicate accepts the trimmed key unchanged
impl<F> LookupKeyFormat for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn normalize(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if !trimmed.is_empty() && self(trimmed) {
            Some(trimmed.to_string())
        } else {
            None
        }
    }
}

/// Canadian civil aircraft registration mark
///
/// `C-` followed by a nationality series letter (`F`, `G`, or `I` for
/// ultralights) and three letters. Input is accepted in any case, with or
/// without the hyphen; the normalized form is `C-FABC`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CanadianRegistration;

impl LookupKeyFormat for CanadianRegistration {
    fn normalize(&self, raw: &str) -> Option<String> {
        let compact: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        // C + series + three letters
        if compact.len() != 5 || !compact.chars().all(|c| c.is_ascii_uppercase()) {
            return None;
        }
        // Only a single hyphen directly after the country prefix is tolerated
        let hyphens: Vec<usize> = raw.trim().match_indices('-').map(|(i, _)| i).collect();
        if !(hyphens.is_empty() || hyphens == [1]) {
            return None;
        }

        let mut chars = compact.chars();
        if chars.next() != Some('C') {
            return None;
        }
        match chars.next() {
            Some('F') | Some('G') | Some('I') => {}
            _ => return None,
        }

        Some(format!("C-{}", &compact[1..]))
    }
}
