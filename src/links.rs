// src/links.rs
//! Link detection used by the intake to fill `IncomingMessage::link_count`.
//! The engine itself only sees the number.

use once_cell::sync::Lazy;
use regex::Regex;

// URL-e, zaproszenia i @wzmianki kanałów liczą się jako linki.
static RE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ix)
        (?:https?://|www\.)[^\s<>()]+
        | \b(?:t\.me|telegram\.me|discord\.gg)/[A-Za-z0-9_+/-]+
        | (?:^|[\s(])@[A-Za-z0-9_]{3,}
    ")
    .expect("link regex")
});

/// Number of link-like fragments in `text`.
pub fn count_links(text: &str) -> u32 {
    let n = RE_LINK.find_iter(text).count();
    u32::try_from(n).unwrap_or(u32::MAX)
}
