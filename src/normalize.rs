// src/normalize.rs
//! Text canonicalization applied to both keyword phrases and messages
//! before they are compared.
//!
//! Steps, in order:
//! 1. NFKC (fullwidth/compatibility forms collapse onto plain letters),
//! 2. lowercase (skipped for case-sensitive keywords),
//! 3. transliteration (only when requested): Cyrillic onto Latin, then
//!    Latin letters without a Cyrillic counterpart (`c`, `q`, `w`, `x`, `j`)
//!    onto the spelling a Cyrillic word would produce,
//! 4. diacritic stripping (`é` → `e`, `ё` → `е`; `й` survives), followed by
//!    one more transliteration pass when step 3 ran,
//! 5. trim + collapse whitespace runs into single spaces.
//!
//! The result is idempotent: running it twice gives the same string.

use std::fmt;

use once_cell::sync::Lazy;
use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Text after [`normalize`]. Only produced by this module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/* =========================================
   Transliteration table (RU → EN, phonetic)
   ========================================= */

static CYR_TO_LAT: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('а', "a"), ('б', "b"), ('в', "v"), ('г', "g"), ('д', "d"),
        ('е', "e"), ('ё', "yo"), ('ж', "zh"), ('з', "z"), ('и', "i"),
        ('й', "y"), ('к', "k"), ('л', "l"), ('м', "m"), ('н', "n"),
        ('о', "o"), ('п', "p"), ('р', "r"), ('с', "s"), ('т', "t"),
        ('у', "u"), ('ф', "f"), ('х', "h"), ('ц', "ts"), ('ч', "ch"),
        ('ш', "sh"), ('щ', "sch"), ('ъ', ""), ('ы', "y"), ('ь', ""),
        ('э', "e"), ('ю', "yu"), ('я', "ya"),
        // ukraiński/białoruski
        ('і', "i"), ('ї', "yi"), ('є', "ye"), ('ґ', "g"), ('ў', "u"),
    ])
});

/* =========================================
   Latin fold (EN → RU sounds, spelled in Latin)
   ========================================= */

// Litery, których nie daje tabela RU → EN. Wynik nie zawiera
// żadnej z nich, więc fold jest idempotentny.
static LAT_FOLD: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('c', "k"), ('q', "k"), ('w', "v"), ('x', "ks"), ('j', "dzh"),
    ])
});

fn fold_latin_char(c: char, out: &mut String) {
    if let Some(lat) = LAT_FOLD.get(&c) {
        out.push_str(lat);
        return;
    }
    if c.is_ascii_uppercase() {
        if let Some(lat) = LAT_FOLD.get(&c.to_ascii_lowercase()) {
            let mut chars = lat.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
            return;
        }
    }
    out.push(c);
}

/// Map one character onto Latin. Uppercase Cyrillic gives a capitalized
/// Latin sequence (`Щ` → `Sch`). Unmapped characters come back unchanged.
fn transliterate_char(c: char, out: &mut String) {
    if let Some(lat) = CYR_TO_LAT.get(&c) {
        out.push_str(lat);
        return;
    }
    if c.is_uppercase() {
        let mut lower = c.to_lowercase();
        if let (Some(l), None) = (lower.next(), lower.next()) {
            if let Some(lat) = CYR_TO_LAT.get(&l) {
                let mut chars = lat.chars();
                if let Some(first) = chars.next() {
                    out.extend(first.to_uppercase());
                    out.push_str(chars.as_str());
                }
                return;
            }
        }
    }
    out.push(c);
}

/// Transliterate a whole string onto the Latin script and fold Latin
/// spellings onto the same form, so `кот`/`cot` and `джаз`/`jazz` meet.
pub fn transliterate(s: &str) -> String {
    let mut lat = String::with_capacity(s.len());
    for c in s.chars() {
        transliterate_char(c, &mut lat);
    }
    let mut out = String::with_capacity(lat.len());
    for c in lat.chars() {
        fold_latin_char(c, &mut out);
    }
    out
}

/// Drop combining marks, except the breve that turns `и` into `й`.
fn strip_diacritics(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev: Option<char> = None;
    for c in s.nfd() {
        if is_combining_mark(c) {
            let keep = c == '\u{0306}' && matches!(prev, Some('и') | Some('И'));
            if keep {
                out.push(c);
            }
            continue;
        }
        out.push(c);
        prev = Some(c);
    }
    out.nfc().collect()
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonicalize `text` for matching.
pub fn normalize(text: &str, transliterate_text: bool, case_sensitive: bool) -> NormalizedText {
    if text.is_empty() {
        return NormalizedText::default();
    }

    let mut s: String = text.nfkc().collect();
    if !case_sensitive {
        s = s.to_lowercase();
    }
    if transliterate_text {
        s = transliterate(&s);
    }
    s = strip_diacritics(&s);
    if transliterate_text {
        // po zdjęciu znaków diakrytycznych wychodzą nowe litery do złożenia (ç → c)
        s = transliterate(&s);
    }
    NormalizedText(collapse_whitespace(&s))
}
