//! Text tokenization and relevance scoring.
//!
//! Tokenization turns column text into ordered `{original, normalized,
//! position}` triples: lowercase, strip punctuation and tabs/newlines,
//! collapse whitespace, split on space, then fold each word per the
//! column's [`TokenizeMode`]. A caller-supplied tokenizer may preempt the
//! pipeline; returning `None` falls back.
//!
//! Stemming, phonetic folding, and fuzzy matching are external
//! collaborators behind the [`Stemmer`], [`Phonetic`], and [`FuzzyMatcher`]
//! traits. The defaults wire rust-stemmers (English) and levenshtein
//! distance; the phonetic default is a passthrough — plug a metaphone
//! implementation to get phonetic folding.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rust_stemmers::Algorithm;

/// How a search-indexed column folds words after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizeMode {
    /// Normalized form is the word itself.
    Raw,
    /// Phonetic encoding of the stem.
    English,
    /// Stem only.
    EnglishStem,
    /// Phonetic encoding only.
    EnglishMeta,
}

/// One token of a text value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub original: String,
    pub normalized: String,
    pub position: usize,
}

pub trait Stemmer: Send + Sync {
    fn stem(&self, word: &str) -> String;
}

pub trait Phonetic: Send + Sync {
    fn encode(&self, word: &str) -> String;
}

pub trait FuzzyMatcher: Send + Sync {
    fn distance(&self, a: &str, b: &str) -> usize;
}

/// English stemmer backed by rust-stemmers.
pub struct EnglishStemmer {
    inner: rust_stemmers::Stemmer,
}

impl EnglishStemmer {
    pub fn new() -> Self {
        EnglishStemmer {
            inner: rust_stemmers::Stemmer::create(Algorithm::English),
        }
    }
}

impl Default for EnglishStemmer {
    fn default() -> Self {
        EnglishStemmer::new()
    }
}

impl Stemmer for EnglishStemmer {
    fn stem(&self, word: &str) -> String {
        self.inner.stem(word).into_owned()
    }
}

/// Identity phonetic encoding. Swap in a metaphone implementation for
/// true phonetic folding; with the passthrough, `English` behaves like
/// `EnglishStem` and `EnglishMeta` like `Raw`.
#[derive(Debug, Default)]
pub struct PassthroughPhonetic;

impl Phonetic for PassthroughPhonetic {
    fn encode(&self, word: &str) -> String {
        word.to_string()
    }
}

/// Levenshtein distance backed by strsim.
#[derive(Debug, Default)]
pub struct Levenshtein;

impl FuzzyMatcher for Levenshtein {
    fn distance(&self, a: &str, b: &str) -> usize {
        strsim::levenshtein(a, b)
    }
}

/// A caller-supplied tokenizer: `(column, text) -> tokens`, or `None` to
/// fall back to the built-in pipeline.
pub type CustomTokenizer = Arc<dyn Fn(&str, &str) -> Option<Vec<Token>> + Send + Sync>;

/// The pluggable text pipeline carried by the engine context.
pub struct Tokenizers {
    pub stemmer: Box<dyn Stemmer>,
    pub phonetic: Box<dyn Phonetic>,
    pub fuzzy: Box<dyn FuzzyMatcher>,
    pub custom: Option<CustomTokenizer>,
}

impl Default for Tokenizers {
    fn default() -> Self {
        Tokenizers {
            stemmer: Box::new(EnglishStemmer::new()),
            phonetic: Box::new(PassthroughPhonetic),
            fuzzy: Box::new(Levenshtein),
            custom: None,
        }
    }
}

impl Tokenizers {
    /// Tokenize column text. Positions are word offsets after whitespace
    /// collapse, so they are dense and zero-based.
    pub fn tokenize(&self, column: &str, mode: TokenizeMode, text: &str) -> Vec<Token> {
        if let Some(custom) = &self.custom
            && let Some(tokens) = custom(column, text)
        {
            return tokens;
        }

        normalize_words(text)
            .into_iter()
            .enumerate()
            .map(|(position, original)| {
                let normalized = match mode {
                    TokenizeMode::Raw => original.clone(),
                    TokenizeMode::EnglishStem => self.stemmer.stem(&original),
                    TokenizeMode::EnglishMeta => self.phonetic.encode(&original),
                    TokenizeMode::English => self.phonetic.encode(&self.stemmer.stem(&original)),
                };
                Token {
                    original,
                    normalized,
                    position,
                }
            })
            .collect()
    }

    /// Whether an indexed word is close enough to a query term.
    pub fn fuzzy_matches(&self, term: &str, word: &str, distance_divisor: usize) -> bool {
        let cap = (term.chars().count() / distance_divisor.max(1)).max(1);
        self.fuzzy.distance(term, word) <= cap
    }
}

/// Lowercase, strip punctuation, collapse whitespace, split.
fn normalize_words(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
        } else if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        }
        // Punctuation and control characters are dropped.
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

// ── Relevance scoring ────────────────────────────────────────────────────

/// Filter applied to normalized weights, derived from the query comparator:
/// `=` is exact mode, `>X` / `<X` are fuzzy with a weight bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchThreshold {
    Exact,
    Above(f64),
    Below(f64),
}

impl SearchThreshold {
    pub fn is_fuzzy(&self) -> bool {
        !matches!(self, SearchThreshold::Exact)
    }

    pub fn keeps(&self, weight: f64) -> bool {
        match self {
            SearchThreshold::Exact => true,
            SearchThreshold::Above(x) => weight > *x,
            SearchThreshold::Below(x) => weight < x.abs(),
        }
    }
}

/// One indexed word matched in one column of one row.
#[derive(Debug, Clone)]
pub struct WordHit {
    /// The normalized indexed word.
    pub word: String,
    /// Token positions of the word within the column.
    pub positions: Vec<usize>,
    /// Token count of the column at index time.
    pub doc_len: usize,
    /// `levenshtein(term, word)`; 0 for an exact match.
    pub distance: usize,
    /// Indices of the query terms this word matched.
    pub terms: BTreeSet<usize>,
}

/// All hits for one column of one row.
#[derive(Debug, Clone, Default)]
pub struct ColumnHits {
    pub boost: f64,
    pub hits: Vec<WordHit>,
}

/// Everything matched for one row, keyed by column.
#[derive(Debug, Clone, Default)]
pub struct RowMatch {
    pub columns: BTreeMap<String, ColumnHits>,
}

/// Raw (pre-normalization) relevance of one row.
///
/// Per matched column: the summed hit positions over `doc_len`, plus the
/// column boost; plus one per distinct matched query term; in fuzzy mode,
/// plus `10 / (distance * 10)` per co-locating pair of hits and
/// `10 / (5 * levenshtein)` per approximate word match.
pub fn score_row(m: &RowMatch, fuzzy: bool) -> f64 {
    let mut score = 0.0;
    let mut matched_terms: BTreeSet<usize> = BTreeSet::new();

    for col in m.columns.values() {
        let hit_count: usize = col.hits.iter().map(|h| h.positions.len()).sum();
        if hit_count == 0 {
            continue;
        }
        let hit_positions: usize = col
            .hits
            .iter()
            .map(|h| h.positions.iter().sum::<usize>())
            .sum();
        let doc_len = col.hits[0].doc_len.max(1);
        score += hit_positions as f64 / doc_len as f64 + col.boost;
        for hit in &col.hits {
            matched_terms.extend(hit.terms.iter().copied());
        }

        if fuzzy {
            for (i, a) in col.hits.iter().enumerate() {
                for b in col.hits.iter().skip(i + 1) {
                    if let Some(dist) = min_position_distance(&a.positions, &b.positions) {
                        score += 10.0 / (dist.max(1) as f64 * 10.0);
                    }
                }
            }
            for hit in &col.hits {
                if hit.distance > 0 {
                    score += 10.0 / (5.0 * hit.distance as f64);
                }
            }
        }
    }

    score + matched_terms.len() as f64
}

/// Whether the query's token sequence appears contiguously in this column.
/// Exact multi-term mode discards rows that fail this.
pub fn has_contiguous_sequence(col: &ColumnHits, query_len: usize) -> bool {
    if query_len <= 1 {
        return col.hits.iter().any(|h| !h.positions.is_empty());
    }
    // Positions per query term index (a word may match several terms).
    let mut per_term: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); query_len];
    for hit in &col.hits {
        for term in &hit.terms {
            if *term < query_len {
                per_term[*term].extend(hit.positions.iter().copied());
            }
        }
    }
    per_term[0].iter().any(|start| {
        (1..query_len).all(|k| per_term[k].contains(&(start + k)))
    })
}

fn min_position_distance(a: &[usize], b: &[usize]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for x in a {
        for y in b {
            let d = x.abs_diff(*y);
            best = Some(best.map_or(d, |cur| cur.min(d)));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn toks() -> Tokenizers {
        Tokenizers::default()
    }

    #[test]
    fn test_pipeline_lowercases_and_strips_punctuation() {
        let tokens = toks().tokenize("body", TokenizeMode::Raw, "The quick,\tbrown\nfox!");
        let words: Vec<&str> = tokens.iter().map(|t| t.normalized.as_str()).collect();
        assert_eq!(words, vec!["the", "quick", "brown", "fox"]);
        assert_eq!(tokens[3].position, 3);
    }

    #[test]
    fn test_stem_mode_folds_inflections() {
        let a = toks().tokenize("body", TokenizeMode::EnglishStem, "running");
        let b = toks().tokenize("body", TokenizeMode::EnglishStem, "runs");
        assert_eq!(a[0].normalized, b[0].normalized);
    }

    #[test]
    fn test_custom_tokenizer_preempts_and_falls_back() {
        let mut t = Tokenizers::default();
        t.custom = Some(Arc::new(|column, text| {
            if column == "special" {
                Some(vec![Token {
                    original: text.to_string(),
                    normalized: text.to_string(),
                    position: 0,
                }])
            } else {
                None
            }
        }));
        assert_eq!(t.tokenize("special", TokenizeMode::Raw, "A B").len(), 1);
        assert_eq!(t.tokenize("plain", TokenizeMode::Raw, "A B").len(), 2);
    }

    #[test]
    fn test_fuzzy_matches_tolerance_scales_with_length() {
        let t = toks();
        assert!(t.fuzzy_matches("browm", "brown", 3));
        assert!(!t.fuzzy_matches("cat", "dog", 3));
    }

    fn hit(word: &str, positions: &[usize], doc_len: usize, distance: usize, terms: &[usize]) -> WordHit {
        WordHit {
            word: word.into(),
            positions: positions.to_vec(),
            doc_len,
            distance,
            terms: terms.iter().copied().collect(),
        }
    }

    #[test]
    fn test_score_rewards_density_and_distinct_terms() {
        let mut dense = RowMatch::default();
        dense.columns.insert(
            "body".into(),
            ColumnHits {
                boost: 1.0,
                hits: vec![hit("brown", &[2], 4, 0, &[0]), hit("fox", &[3], 4, 0, &[1])],
            },
        );
        let mut sparse = RowMatch::default();
        sparse.columns.insert(
            "body".into(),
            ColumnHits {
                boost: 1.0,
                hits: vec![hit("brown", &[1], 3, 0, &[0])],
            },
        );
        assert!(score_row(&dense, false) > score_row(&sparse, false));
    }

    #[test]
    fn test_fuzzy_bonus_favors_closer_words() {
        let mut close = RowMatch::default();
        close.columns.insert(
            "body".into(),
            ColumnHits {
                boost: 0.0,
                hits: vec![hit("brown", &[2], 4, 1, &[0])],
            },
        );
        let mut far = RowMatch::default();
        far.columns.insert(
            "body".into(),
            ColumnHits {
                boost: 0.0,
                hits: vec![hit("braun", &[2], 4, 3, &[0])],
            },
        );
        assert!(score_row(&close, true) > score_row(&far, true));
    }

    #[test]
    fn test_contiguous_sequence_detection() {
        let col = ColumnHits {
            boost: 0.0,
            hits: vec![hit("brown", &[2], 4, 0, &[0]), hit("fox", &[3], 4, 0, &[1])],
        };
        assert!(has_contiguous_sequence(&col, 2));

        let gap = ColumnHits {
            boost: 0.0,
            hits: vec![hit("brown", &[0], 4, 0, &[0]), hit("fox", &[3], 4, 0, &[1])],
        };
        assert!(!has_contiguous_sequence(&gap, 2));
    }

    #[test]
    fn test_threshold_semantics() {
        assert!(SearchThreshold::Exact.keeps(0.0));
        assert!(SearchThreshold::Above(0.0).keeps(0.5));
        assert!(!SearchThreshold::Above(0.5).keeps(0.5));
        assert!(SearchThreshold::Below(-0.5).keeps(0.2));
        assert!(!SearchThreshold::Below(-0.5).keeps(0.9));
    }

    proptest! {
        #[test]
        fn prop_positions_are_dense_and_ordered(text in ".{0,200}") {
            let tokens = toks().tokenize("c", TokenizeMode::Raw, &text);
            for (i, t) in tokens.iter().enumerate() {
                prop_assert_eq!(t.position, i);
                prop_assert!(!t.normalized.is_empty());
                prop_assert_eq!(t.normalized.clone(), t.normalized.to_lowercase());
            }
        }
    }
}
