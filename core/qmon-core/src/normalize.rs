//! Case- and accent-insensitive text folding.
//!
//! Host labels arrive in French or English with inconsistent accents and
//! casing ("Occupé", "OCCUPE", "occupe"). Everything that matches text goes
//! through [`fold`] first.

/// Lowercases and strips Latin diacritics, collapsing whitespace runs
/// (including non-breaking spaces) to a single ASCII space.
pub fn fold(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars() {
        if ch.is_whitespace() || ch == '\u{00A0}' || ch == '\u{202F}' {
            pending_space = !out.is_empty();
            continue;
        }
        if is_combining_mark(ch) {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match strip_accent(ch) {
            Some(base) => out.push_str(base),
            None => out.extend(ch.to_lowercase()),
        }
    }

    out
}

/// True when `haystack` contains `needle` after folding both. An empty needle
/// matches everything.
pub fn matches_filter(haystack: &str, needle: &str) -> bool {
    let needle = fold(needle);
    needle.is_empty() || fold(haystack).contains(&needle)
}

/// True when the folded label contains any of the (already folded) terms.
pub fn contains_any(folded: &str, terms: &[&str]) -> bool {
    terms.iter().any(|term| folded.contains(term))
}

fn is_combining_mark(ch: char) -> bool {
    matches!(ch, '\u{0300}'..='\u{036F}')
}

fn strip_accent(ch: char) -> Option<&'static str> {
    let base = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'æ' | 'Æ' => "ae",
        'ç' | 'Ç' => "c",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ñ' | 'Ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "o",
        'œ' | 'Œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' | 'Ÿ' => "y",
        'ß' => "ss",
        // Typographic apostrophes and dashes seen in host labels.
        '\u{2019}' | '\u{2018}' => "'",
        '\u{2010}' | '\u{2011}' | '\u{2013}' | '\u{2014}' => "-",
        _ => return None,
    };
    Some(base)
}
