//! Lexical domain classifier.
//!
//! Labels text as quantitative, qualitative or mixed from three signals:
//! the share of tokens containing digits, mathematical markers per 100
//! words, and narrative or citation markers per 100 words. The label only
//! biases scoring targets downstream through [`DomainProfile`]; it never
//! rejects a summary.

use serde::Serialize;

use crate::models::{Chunk, Domain};
use crate::settings::NumericTargets;

const MATH_MARKERS: &[&str] = &[
    "theorem",
    "proof",
    "lemma",
    "equation",
    "formula",
    "derivative",
    "integral",
    "matrix",
    "probability",
    "variance",
    "coefficient",
    "solve",
];

const MATH_SYMBOLS: &[char] = &['=', '+', '^', '√', '∑', '∫', '≤', '≥', '×', '÷', 'π'];

const NARRATIVE_MARKERS: &[&str] = &[
    "argue",
    "argues",
    "argued",
    "according",
    "interpretation",
    "perspective",
    "historian",
    "historians",
    "narrative",
    "identity",
    "society",
    "culture",
    "critics",
    "author",
];

/// A domain label with the numeric-example target that goes with it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DomainProfile {
    pub domain: Domain,
    pub numeric_target: f64,
}

impl DomainProfile {
    pub fn new(domain: Domain, targets: &NumericTargets) -> Self {
        Self {
            domain,
            numeric_target: targets.for_domain(domain),
        }
    }
}

/// Raw signal strengths for a text.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DomainSignals {
    pub words: usize,
    pub numeric_share: f64,
    pub math_per_100: f64,
    pub narrative_per_100: f64,
}

impl DomainSignals {
    pub fn quantitative_score(&self) -> f64 {
        self.numeric_share * 10.0 + self.math_per_100
    }

    pub fn qualitative_score(&self) -> f64 {
        self.narrative_per_100
    }
}

pub fn signals(text: &str) -> DomainSignals {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    if tokens.is_empty() {
        return DomainSignals::default();
    }
    let words = tokens.len();
    let per_100 = |n: usize| n as f64 * 100.0 / words as f64;

    let numeric = tokens
        .iter()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .count();

    let mut math = text.chars().filter(|c| MATH_SYMBOLS.contains(c)).count();
    let mut narrative = text.matches('"').count() / 2
        + text.matches('“').count()
        + text.matches(" et al").count()
        + count_author_year_citations(text);

    for token in &tokens {
        let word: String = token
            .chars()
            .filter(|c| c.is_alphabetic())
            .flat_map(char::to_lowercase)
            .collect();
        if MATH_MARKERS.contains(&word.as_str()) {
            math += 1;
        }
        if NARRATIVE_MARKERS.contains(&word.as_str()) {
            narrative += 1;
        }
    }

    DomainSignals {
        words,
        numeric_share: numeric as f64 / words as f64,
        math_per_100: per_100(math),
        narrative_per_100: per_100(narrative),
    }
}

/// Classify a single text.
pub fn classify_text(text: &str) -> Domain {
    let s = signals(text);
    let quant = s.quantitative_score();
    let qual = s.qualitative_score();
    if quant < 0.5 && qual < 0.5 {
        return Domain::Mixed;
    }
    if quant >= qual * 1.5 {
        Domain::Quantitative
    } else if qual >= quant * 1.5 {
        Domain::Qualitative
    } else {
        Domain::Mixed
    }
}

/// Classify a whole document from its chunks: uniform labels propagate,
/// any disagreement yields [`Domain::Mixed`]. Returns the document profile
/// and the per-chunk labels.
pub fn classify_chunks(chunks: &[Chunk], targets: &NumericTargets) -> (DomainProfile, Vec<Domain>) {
    let per_chunk: Vec<Domain> = chunks.iter().map(|c| classify_text(&c.text)).collect();
    (DomainProfile::new(combine(&per_chunk), targets), per_chunk)
}

pub fn combine(labels: &[Domain]) -> Domain {
    match labels.split_first() {
        Some((first, rest)) if rest.iter().all(|d| d == first) => *first,
        Some(_) => Domain::Mixed,
        None => Domain::Mixed,
    }
}

/// Count `(Name, 1999)`-style parenthetical citations.
fn count_author_year_citations(text: &str) -> usize {
    text.split('(')
        .skip(1)
        .filter_map(|rest| rest.split(')').next())
        .filter(|inner| {
            let mut parts = inner.rsplitn(2, ',');
            let year = parts.next().unwrap_or("").trim();
            let name = parts.next().unwrap_or("").trim();
            year.len() == 4
                && year.chars().all(|c| c.is_ascii_digit())
                && name.chars().next().is_some_and(char::is_uppercase)
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUANT: &str = "The derivative of x^2 equals 2x, so at x = 3 the slope is 6. \
        Solve the equation 4x + 2 = 10 to get x = 2. The integral of 2x from 0 to 1 is 1.";

    const QUAL: &str = "Historians argue that the reform reshaped civic identity. \
        According to Smith (Smith, 1998), the narrative of progress hid older tensions. \
        Critics describe this as \"a managed memory\" of society and culture.";

    #[test]
    fn test_quantitative_text() {
        assert_eq!(classify_text(QUANT), Domain::Quantitative);
    }

    #[test]
    fn test_qualitative_text() {
        assert_eq!(classify_text(QUAL), Domain::Qualitative);
    }

    #[test]
    fn test_blend_is_mixed() {
        assert_eq!(classify_text(""), Domain::Mixed);
        assert_eq!(combine(&[Domain::Quantitative, Domain::Qualitative]), Domain::Mixed);
        assert_eq!(combine(&[Domain::Qualitative, Domain::Qualitative]), Domain::Qualitative);
        assert_eq!(combine(&[]), Domain::Mixed);
    }

    #[test]
    fn test_author_year_citations() {
        assert_eq!(count_author_year_citations("as shown (Smith, 1998) and (Lee, 2004)."), 2);
        assert_eq!(count_author_year_citations("see (figure 2) and (x, 12)"), 0);
    }

    fn chunk(ordinal: usize, text: &str) -> Chunk {
        Chunk {
            ordinal,
            start: 0,
            end: text.len(),
            overlap_start: 0,
            text: text.to_string(),
            token_count: text.len() / 4,
            hash: String::new(),
        }
    }

    #[test]
    fn test_profile_targets() {
        let p = DomainProfile::new(Domain::Quantitative, &NumericTargets::default());
        assert_eq!(p.numeric_target, 0.70);
    }

    #[test]
    fn test_classify_chunks_carries_configured_target() {
        let targets = NumericTargets {
            quantitative: 0.9,
            qualitative: 0.1,
            mixed: 0.4,
        };
        let (profile, labels) = classify_chunks(&[chunk(0, QUANT), chunk(1, QUANT)], &targets);
        assert_eq!(labels, vec![Domain::Quantitative, Domain::Quantitative]);
        assert_eq!(profile.domain, Domain::Quantitative);
        assert_eq!(profile.numeric_target, 0.9);

        let (profile, _) = classify_chunks(&[chunk(0, QUANT), chunk(1, QUAL)], &targets);
        assert_eq!(profile, DomainProfile::new(Domain::Mixed, &targets));
        assert_eq!(profile.numeric_target, 0.4);
    }
}
