//! Filesystem-safe slugs for country names.
//!
//! A slug is the record's stable key across runs and the stem of its PDF file.
//!
//! # Rules
//!
//! 1. Fold common Latin diacritics to ASCII ("Côte" → "Cote", "São" → "Sao")
//! 2. Lowercase
//! 3. Replace every run of characters outside `[a-z0-9]` with a single `_`
//! 4. Trim `_` from both ends; an empty result becomes `unnamed`
//!
//! Distinct names can still collide ("Guinea-Bissau" and "Guinea Bissau");
//! [`SlugAllocator`] disambiguates those with a numeric suffix.

use std::collections::HashMap;

const FILLER: char = '_';
const EMPTY_SLUG: &str = "unnamed";

/// Derive the base slug for a country name.
///
/// `"Côte d'Ivoire"` → `"cote_d_ivoire"`
pub fn country_slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_filler = false;

    for ch in name.chars().flat_map(fold_diacritic) {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            if pending_filler && !out.is_empty() {
                out.push(FILLER);
            }
            pending_filler = false;
            out.push(ch);
        } else {
            pending_filler = true;
        }
    }

    if out.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        out
    }
}

/// Map a character to its ASCII base letters, or pass it through unchanged.
fn fold_diacritic(ch: char) -> impl Iterator<Item = char> {
    let folded: &'static str = match ch {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' => "C",
        'ç' => "c",
        'È' | 'É' | 'Ê' | 'Ë' => "E",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'Ì' | 'Í' | 'Î' | 'Ï' => "I",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'Ñ' => "N",
        'ñ' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => "o",
        'Ù' | 'Ú' | 'Û' | 'Ü' => "U",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'Ý' => "Y",
        'ý' | 'ÿ' => "y",
        'ß' => "ss",
        _ => "",
    };
    let passthrough = folded.is_empty().then_some(ch);
    folded.chars().chain(passthrough)
}

/// Hands out unique slugs for one scrape, in document order.
///
/// The same country name always gets the same slug. A different name whose
/// base slug is already taken gets `<base>_2`, `<base>_3`, ... Since the table
/// is walked in document order, suffixes are stable across runs as long as
/// the page order is.
#[derive(Debug, Default)]
pub struct SlugAllocator {
    by_name: HashMap<String, String>,
    taken: HashMap<String, String>,
}

impl SlugAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the slug for `name`, allocating a suffixed one on collision.
    pub fn allocate(&mut self, name: &str) -> String {
        let key = name.trim().to_string();
        if let Some(slug) = self.by_name.get(&key) {
            return slug.clone();
        }

        let base = country_slug(&key);
        let mut candidate = base.clone();
        let mut n = 2;
        while self.taken.contains_key(&candidate) {
            candidate = format!("{base}{FILLER}{n}");
            n += 1;
        }
        if candidate != base {
            tracing::warn!(
                country = %key,
                base = %base,
                slug = %candidate,
                "slug collision, disambiguated with suffix"
            );
        }

        self.taken.insert(candidate.clone(), key.clone());
        self.by_name.insert(key, candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ivory_coast() {
        assert_eq!(country_slug("Côte d'Ivoire"), "cote_d_ivoire");
    }

    #[test]
    fn plain_names() {
        assert_eq!(country_slug("Kenya"), "kenya");
        assert_eq!(country_slug("Burkina Faso"), "burkina_faso");
        assert_eq!(country_slug("Saint Vincent and the Grenadines"), "saint_vincent_and_the_grenadines");
    }

    #[test]
    fn accents_and_punctuation() {
        assert_eq!(country_slug("São Tomé and Príncipe"), "sao_tome_and_principe");
        assert_eq!(country_slug("Türkiye"), "turkiye");
        assert_eq!(country_slug("Guinea-Bissau"), "guinea_bissau");
        assert_eq!(country_slug("  Timor-Leste (2021) "), "timor_leste_2021");
    }

    #[test]
    fn runs_collapse_to_single_filler() {
        assert_eq!(country_slug("A -- B"), "a_b");
    }

    #[test]
    fn empty_and_symbol_only() {
        assert_eq!(country_slug(""), "unnamed");
        assert_eq!(country_slug("!!!"), "unnamed");
    }

    #[test]
    fn deterministic() {
        let a = country_slug("Lao People's Democratic Republic");
        let b = country_slug("Lao People's Democratic Republic");
        assert_eq!(a, b);
        assert_eq!(a, "lao_people_s_democratic_republic");
    }

    #[test]
    fn allocator_same_name_same_slug() {
        let mut alloc = SlugAllocator::new();
        assert_eq!(alloc.allocate("Kenya"), "kenya");
        assert_eq!(alloc.allocate("Kenya "), "kenya");
    }

    #[test]
    fn allocator_suffixes_collisions_in_order() {
        let mut alloc = SlugAllocator::new();
        assert_eq!(alloc.allocate("Guinea-Bissau"), "guinea_bissau");
        assert_eq!(alloc.allocate("Guinea Bissau"), "guinea_bissau_2");
        assert_eq!(alloc.allocate("Guinea/Bissau"), "guinea_bissau_3");
        assert_eq!(alloc.allocate("Guinea Bissau"), "guinea_bissau_2");
    }
}
