//! Edit-distance based similarity between two identifiers.

/// Base score for one identifier containing the other.
const CONTAINMENT_BASE: f64 = 0.8;
/// Extra score for containment, scaled by the length ratio.
const CONTAINMENT_SPAN: f64 = 0.15;

/// How two identifiers relate, before it is turned into a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Similarity {
    /// Equal after case folding.
    Exact,
    /// The first identifier contains the second.
    FirstContainsSecond(f64),
    /// The second identifier contains the first.
    SecondContainsFirst(f64),
    /// Neither contains the other; normalised edit-distance score.
    Edit(f64),
}

impl Similarity {
    /// Numeric score in `[0, 1]`.
    #[must_use]
    pub fn score(self) -> f64 {
        match self {
            Self::Exact => 1.0,
            Self::FirstContainsSecond(score) | Self::SecondContainsFirst(score) | Self::Edit(score) => {
                score
            }
        }
    }
}

/// Compares two identifiers case-insensitively.
///
/// Lengths are counted in characters, so Hangul identifiers are not penalised for their
/// UTF-8 width.
#[must_use]
pub fn compare(a: &str, b: &str) -> Similarity {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();

    if a == b {
        return Similarity::Exact;
    }
    if a.is_empty() || b.is_empty() {
        return Similarity::Edit(0.0);
    }

    let (min_len, max_len) = (a.len().min(b.len()), a.len().max(b.len()));
    #[allow(clippy::cast_precision_loss)]
    let ratio = min_len as f64 / max_len as f64;
    let containment = CONTAINMENT_BASE + ratio * CONTAINMENT_SPAN;

    if contains(&a, &b) {
        return Similarity::FirstContainsSecond(containment);
    }
    if contains(&b, &a) {
        return Similarity::SecondContainsFirst(containment);
    }

    #[allow(clippy::cast_precision_loss)]
    let normalised = 1.0 - levenshtein(&a, &b) as f64 / max_len as f64;
    Similarity::Edit(normalised.clamp(0.0, 1.0))
}

/// Similarity score of `a` and `b` in `[0, 1]`; `1.0` only for case-insensitive equality.
///
/// ```rust
/// use handoff::matching::similarity::score;
///
/// assert!((score("jinho", "JINHO") - 1.0).abs() < f64::EPSILON);
/// assert!(score("jinho_writer", "jinho") >= 0.8);
/// assert!(score("abc", "xyz") < 0.1);
/// ```
#[must_use]
pub fn score(a: &str, b: &str) -> f64 {
    compare(a, b).score()
}

fn contains(haystack: &[char], needle: &[char]) -> bool {
    needle.len() <= haystack.len() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Unit-cost Levenshtein distance, two-row variant.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
