// src/matcher.rs
//! Keyword matching: glob patterns first, edit-distance tolerance second.
//!
//! Every keyword is compiled once per snapshot ([`KeywordSet`]) with its own
//! case/transliteration flags. A message is wrapped in [`MessageText`], which
//! normalizes lazily, once per flag combination actually used by the set.
//!
//! Sets with more than `index_threshold` keywords (default
//! [`DEFAULT_INDEX_THRESHOLD`]) get a trigram index over each keyword's first
//! literal run, so only keywords whose anchor occurs in the message are
//! verified. Below the threshold a linear scan is cheaper. The index is a
//! pure speed-up: both paths return the same result.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use once_cell::unsync::OnceCell;
use serde::Serialize;
use tracing::debug;

use crate::model::Keyword;
use crate::normalize::{normalize, NormalizedText};

/// Keyword count above which sets are indexed. Larger sets need benchmark
/// verification before being relied on.
pub const DEFAULT_INDEX_THRESHOLD: usize = 500;

const ANCHOR_LEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    Pattern,
    Fuzzy,
}

/// Outcome of [`find_match`]. Lives only as long as the keyword set.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub keyword: &'a Keyword,
    pub mode: MatchMode,
    /// Edit distance; always 0 for pattern matches.
    pub distance: usize,
    /// Similarity in `[0, 1]`; 1.0 for pattern matches.
    pub score: f64,
}

/* =========================================
   Flag combinations
   ========================================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Variant {
    transliterate: bool,
    case_sensitive: bool,
}

impl Variant {
    const ALL: [Variant; 4] = [
        Variant { transliterate: false, case_sensitive: false },
        Variant { transliterate: false, case_sensitive: true },
        Variant { transliterate: true, case_sensitive: false },
        Variant { transliterate: true, case_sensitive: true },
    ];

    fn of(kw: &Keyword) -> Self {
        Self {
            transliterate: kw.transliterate,
            case_sensitive: kw.case_sensitive,
        }
    }

    fn slot(self) -> usize {
        (usize::from(self.transliterate) << 1) | usize::from(self.case_sensitive)
    }
}

/* =========================================
   Glob
   ========================================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Lit(char),
    /// `?`
    One,
    /// `*`
    Star,
}

#[derive(Debug, Clone)]
struct Glob {
    /// Wrapped in leading/trailing `Star` so a full match means
    /// "matches some substring".
    tokens: Vec<Token>,
    has_wildcards: bool,
    /// Phrase with escapes resolved and wildcards dropped.
    literal: String,
    anchor: Option<[char; ANCHOR_LEN]>,
}

impl Glob {
    fn compile(phrase: &str) -> Option<Self> {
        let mut core = Vec::new();
        let mut chars = phrase.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some(esc) => core.push(Token::Lit(esc)),
                    None => core.push(Token::Lit('\\')),
                },
                '*' => {
                    if core.last() != Some(&Token::Star) {
                        core.push(Token::Star);
                    }
                }
                '?' => core.push(Token::One),
                other => core.push(Token::Lit(other)),
            }
        }
        if core.is_empty() {
            return None;
        }

        let has_wildcards = core.iter().any(|t| !matches!(t, Token::Lit(_)));
        let literal: String = core
            .iter()
            .filter_map(|t| match t {
                Token::Lit(c) => Some(*c),
                _ => None,
            })
            .collect();
        let anchor = first_literal_run(&core)
            .filter(|run| run.len() >= ANCHOR_LEN)
            .map(|run| [run[0], run[1], run[2]]);

        let mut tokens = Vec::with_capacity(core.len() + 2);
        tokens.push(Token::Star);
        for t in core {
            if !(t == Token::Star && tokens.last() == Some(&Token::Star)) {
                tokens.push(t);
            }
        }
        if tokens.last() != Some(&Token::Star) {
            tokens.push(Token::Star);
        }

        Some(Self {
            tokens,
            has_wildcards,
            literal,
            anchor,
        })
    }

    fn matches(&self, text: &[char]) -> bool {
        wildcard_match(&self.tokens, text)
    }
}

fn first_literal_run(tokens: &[Token]) -> Option<Vec<char>> {
    let mut run = Vec::new();
    for t in tokens {
        match t {
            Token::Lit(c) => run.push(*c),
            _ if run.is_empty() => continue,
            _ => break,
        }
    }
    (!run.is_empty()).then_some(run)
}

/// Iterative glob match with single-star backtracking; O(n·m) worst case.
fn wildcard_match(pattern: &[Token], text: &[char]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;

    while t < text.len() {
        match pattern.get(p) {
            Some(Token::Lit(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            Some(Token::One) => {
                p += 1;
                t += 1;
            }
            Some(Token::Star) => {
                star = Some(p);
                mark = t;
                p += 1;
            }
            _ => match star {
                Some(s) => {
                    p = s + 1;
                    mark += 1;
                    t = mark;
                }
                None => return false,
            },
        }
    }
    while pattern.get(p) == Some(&Token::Star) {
        p += 1;
    }
    p == pattern.len()
}

/* =========================================
   Compiled keyword set
   ========================================= */

#[derive(Debug, Clone)]
struct Compiled {
    variant: Variant,
    /// `None` when the phrase normalizes to nothing; such keywords never match.
    glob: Option<Glob>,
    /// Literal with each word trimmed like message tokens; empty when the
    /// keyword can't be matched fuzzily.
    fuzzy_phrase: String,
    literal_chars: usize,
    word_count: usize,
}

#[derive(Debug, Clone, Default)]
struct TrigramIndex {
    by_slot: [HashMap<[char; ANCHOR_LEN], Vec<usize>>; 4],
    /// Keywords without a usable anchor; always verified.
    unanchored: Vec<usize>,
}

/// Immutable snapshot of a group's keywords, compiled for matching.
#[derive(Debug, Clone, Default)]
pub struct KeywordSet {
    keywords: Vec<Keyword>,
    compiled: Vec<Compiled>,
    fuzzy: Vec<usize>,
    slots_used: [bool; 4],
    index: Option<TrigramIndex>,
}

impl KeywordSet {
    pub fn new(keywords: Vec<Keyword>) -> Self {
        Self::with_index_threshold(keywords, DEFAULT_INDEX_THRESHOLD)
    }

    /// Keywords keep the store's order; that order breaks ties.
    pub fn with_index_threshold(keywords: Vec<Keyword>, index_threshold: usize) -> Self {
        let mut compiled = Vec::with_capacity(keywords.len());
        let mut fuzzy = Vec::new();
        let mut slots_used = [false; 4];

        for (i, kw) in keywords.iter().enumerate() {
            let variant = Variant::of(kw);
            slots_used[variant.slot()] = true;
            let phrase = normalize(&kw.phrase, variant.transliterate, variant.case_sensitive);
            let glob = Glob::compile(phrase.as_str());
            if glob.is_none() {
                debug!(keyword_id = kw.id, "keyword phrase normalizes to nothing; skipped");
            }
            let fuzzy_phrase = glob
                .as_ref()
                .map(|g| word_tokens(&g.literal).collect::<Vec<_>>().join(" "))
                .unwrap_or_default();
            let literal_chars = fuzzy_phrase.chars().count();
            let word_count = word_tokens(&fuzzy_phrase).count();
            if kw.fuzzy && !fuzzy_phrase.is_empty() && glob.as_ref().is_some_and(|g| !g.has_wildcards) {
                fuzzy.push(i);
            }
            compiled.push(Compiled {
                variant,
                glob,
                fuzzy_phrase,
                literal_chars,
                word_count,
            });
        }

        let index = (keywords.len() > index_threshold).then(|| build_index(&compiled));
        if index.is_some() {
            debug!(keywords = keywords.len(), "keyword set indexed");
        }

        Self {
            keywords,
            compiled,
            fuzzy,
            slots_used,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    /// Keyword positions worth verifying in the pattern pass, ascending.
    fn pattern_candidates(&self, msg: &MessageText<'_>) -> Vec<usize> {
        let Some(index) = &self.index else {
            return (0..self.compiled.len()).collect();
        };

        let mut out: BTreeSet<usize> = index.unanchored.iter().copied().collect();
        for variant in Variant::ALL {
            let slot = variant.slot();
            if !self.slots_used[slot] || index.by_slot[slot].is_empty() {
                continue;
            }
            let prepared = msg.prepared(variant);
            for w in prepared.chars.windows(ANCHOR_LEN) {
                if let Some(ids) = index.by_slot[slot].get(&[w[0], w[1], w[2]]) {
                    out.extend(ids.iter().copied());
                }
            }
        }
        out.into_iter().collect()
    }
}

fn build_index(compiled: &[Compiled]) -> TrigramIndex {
    let mut index = TrigramIndex::default();
    for (i, c) in compiled.iter().enumerate() {
        let Some(glob) = &c.glob else { continue };
        match glob.anchor {
            Some(anchor) => index.by_slot[c.variant.slot()]
                .entry(anchor)
                .or_default()
                .push(i),
            None => index.unanchored.push(i),
        }
    }
    index
}

/* =========================================
   Message side
   ========================================= */

/// Space-separated words with surrounding punctuation trimmed.
fn word_tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(' ')
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|t| !t.is_empty())
}

#[derive(Debug)]
struct Prepared {
    text: NormalizedText,
    chars: Vec<char>,
    /// Whitespace tokens with surrounding punctuation trimmed.
    tokens: Vec<String>,
}

/// A message under evaluation; normalized variants are computed on demand.
#[derive(Debug)]
pub struct MessageText<'a> {
    raw: &'a str,
    variants: [OnceCell<Prepared>; 4],
}

impl<'a> MessageText<'a> {
    pub fn new(raw: &'a str) -> Self {
        Self {
            raw,
            variants: Default::default(),
        }
    }

    /// Normalized form for the given flags.
    pub fn normalized(&self, transliterate: bool, case_sensitive: bool) -> &NormalizedText {
        &self
            .prepared(Variant {
                transliterate,
                case_sensitive,
            })
            .text
    }

    fn prepared(&self, variant: Variant) -> &Prepared {
        self.variants[variant.slot()].get_or_init(|| {
            let text = normalize(self.raw, variant.transliterate, variant.case_sensitive);
            let chars = text.as_str().chars().collect();
            let tokens = word_tokens(text.as_str()).map(str::to_owned).collect();
            Prepared {
                text,
                chars,
                tokens,
            }
        })
    }
}

/* =========================================
   Matching
   ========================================= */

/// Escape glob metacharacters so `s` matches only itself.
pub fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Allowed edit distance for a phrase of `len` characters.
pub fn fuzzy_tolerance(len: usize) -> usize {
    (len / 4).max(1)
}

/// Best match of `message` in `set`, or `None`.
///
/// Pattern matches win over fuzzy ones; among pattern matches the earliest
/// keyword wins. Among fuzzy matches: smallest distance, then longest phrase,
/// then earliest keyword.
pub fn find_match<'k>(message: &MessageText<'_>, set: &'k KeywordSet) -> Option<MatchResult<'k>> {
    if set.is_empty() || message.raw.trim().is_empty() {
        return None;
    }

    for i in set.pattern_candidates(message) {
        let c = &set.compiled[i];
        let Some(glob) = &c.glob else { continue };
        let prepared = message.prepared(c.variant);
        if prepared.chars.is_empty() {
            continue;
        }
        if glob.matches(&prepared.chars) {
            return Some(MatchResult {
                keyword: &set.keywords[i],
                mode: MatchMode::Pattern,
                distance: 0,
                score: 1.0,
            });
        }
    }

    let mut best: Option<(usize, usize, usize, usize)> = None; // (distance, len, idx, cand_len)
    for &i in &set.fuzzy {
        let c = &set.compiled[i];
        let prepared = message.prepared(c.variant);
        let Some((distance, cand_len)) = best_fuzzy_distance(c, &prepared.tokens) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((bd, blen, _, _)) => match distance.cmp(&bd) {
                Ordering::Less => true,
                Ordering::Equal => c.literal_chars > blen,
                Ordering::Greater => false,
            },
        };
        if better {
            best = Some((distance, c.literal_chars, i, cand_len));
        }
    }

    best.map(|(distance, len, i, cand_len)| {
        let longest = len.max(cand_len).max(1);
        MatchResult {
            keyword: &set.keywords[i],
            mode: MatchMode::Fuzzy,
            distance,
            score: 1.0 - distance as f64 / longest as f64,
        }
    })
}

/// Smallest distance between the keyword's trimmed phrase and any token
/// n-gram (n up to its word count), if within tolerance.
/// Returns `(distance, candidate_len)`.
fn best_fuzzy_distance(c: &Compiled, tokens: &[String]) -> Option<(usize, usize)> {
    let phrase = c.fuzzy_phrase.as_str();
    let tolerance = fuzzy_tolerance(c.literal_chars);
    let mut best: Option<(usize, usize)> = None;

    for n in 1..=c.word_count.max(1) {
        for window in tokens.windows(n) {
            let candidate = window.join(" ");
            let cand_len = candidate.chars().count();
            if cand_len.abs_diff(c.literal_chars) > tolerance {
                continue;
            }
            let d = strsim::levenshtein(phrase, &candidate);
            if d <= tolerance && best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, cand_len));
            }
        }
    }
    best
}
