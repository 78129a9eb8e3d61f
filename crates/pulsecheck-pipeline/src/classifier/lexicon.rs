//! Offline lexicon classifier for short social posts.

use async_trait::async_trait;
use pulsecheck_core::Label;

use super::{Classification, Classifier, ClassifierError};

/// General-purpose social sentiment word weights.
///
/// Keys are lowercase single words. Values in `(0.0, 1.0]` are positive,
/// in `[-1.0, 0.0)` are negative. The final score is clamped to `[-1.0, 1.0]`.
const LEXICON: &[(&str, f32)] = &[
    // Positive signals
    ("amazing", 0.5),
    ("awesome", 0.5),
    ("best", 0.5),
    ("brilliant", 0.5),
    ("excellent", 0.5),
    ("excited", 0.4),
    ("exciting", 0.4),
    ("fantastic", 0.5),
    ("fun", 0.3),
    ("glad", 0.3),
    ("good", 0.3),
    ("great", 0.4),
    ("happy", 0.4),
    ("helpful", 0.3),
    ("impressive", 0.4),
    ("incredible", 0.5),
    ("love", 0.5),
    ("loved", 0.5),
    ("loving", 0.5),
    ("nice", 0.3),
    ("perfect", 0.5),
    ("recommend", 0.4),
    ("thanks", 0.3),
    ("wonderful", 0.5),
    ("wow", 0.3),
    // Negative signals
    ("angry", -0.5),
    ("annoying", -0.4),
    ("awful", -0.6),
    ("bad", -0.4),
    ("boring", -0.3),
    ("broken", -0.5),
    ("bug", -0.3),
    ("crash", -0.5),
    ("disappointed", -0.5),
    ("disappointing", -0.5),
    ("fail", -0.4),
    ("failed", -0.4),
    ("hate", -0.6),
    ("horrible", -0.6),
    ("problem", -0.3),
    ("sad", -0.4),
    ("scam", -0.7),
    ("slow", -0.3),
    ("terrible", -0.6),
    ("ugly", -0.4),
    ("useless", -0.5),
    ("worst", -0.6),
];

/// Score a text string using the lexicon.
///
/// Splits text into lowercase words, sums matching weights, and clamps
/// the result to `[-1.0, 1.0]`. Returns `0.0` for empty or unknown text.
#[must_use]
pub fn lexicon_score(text: &str) -> f32 {
    let mut score = 0.0_f32;
    for word in text.split_whitespace() {
        let w = word
            .trim_matches(|c: char| !c.is_alphabetic())
            .to_lowercase();
        if let Some(&(_, weight)) = LEXICON.iter().find(|(lex_word, _)| *lex_word == w) {
            score += weight;
        }
    }
    score.clamp(-1.0, 1.0)
}

/// Classifier that needs no network: label by the sign of
/// [`lexicon_score`], confidence `0.5 + |score| / 2`.
///
/// A zero score is reported as NEGATIVE with confidence 0.5 so that
/// neutral text never passes a positive threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconClassifier;

impl LexiconClassifier {
    #[must_use]
    pub fn classify(text: &str) -> Classification {
        let score = f64::from(lexicon_score(text));
        let label = if score > 0.0 {
            Label::Positive
        } else {
            Label::Negative
        };
        Classification {
            label,
            confidence: (0.5 + score.abs() / 2.0).clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Classifier for LexiconClassifier {
    async fn classify_batch(&self, texts: &[&str]) -> Result<Vec<Classification>, ClassifierError> {
        Ok(texts.iter().map(|text| Self::classify(text)).collect())
    }

    fn name(&self) -> &str {
        "lexicon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_returns_zero() {
        assert!(lexicon_score("").abs() < f32::EPSILON);
    }

    #[test]
    fn unknown_text_returns_zero() {
        assert!(lexicon_score("the quick brown fox").abs() < f32::EPSILON);
    }

    #[test]
    fn positive_keyword_returns_positive() {
        let score = lexicon_score("this release is great");
        assert!(score > 0.0, "expected positive score, got {score}");
    }

    #[test]
    fn negative_keyword_returns_negative() {
        let score = lexicon_score("the update is broken");
        assert!(score < 0.0, "expected negative score, got {score}");
    }

    #[test]
    fn score_clamps_to_one() {
        let score = lexicon_score("amazing awesome best brilliant excellent fantastic");
        assert!((score - 1.0).abs() < f32::EPSILON, "got {score}");
    }

    #[test]
    fn punctuation_stripped_from_words() {
        assert!(lexicon_score("Love!!!") > 0.0);
    }

    #[test]
    fn confidence_grows_with_magnitude() {
        let mild = LexiconClassifier::classify("good");
        let strong = LexiconClassifier::classify("amazing awesome perfect");
        assert_eq!(mild.label, Label::Positive);
        assert_eq!(strong.label, Label::Positive);
        assert!(strong.confidence > mild.confidence);
        assert!(strong.confidence <= 1.0);
    }

    #[test]
    fn neutral_text_is_low_confidence_negative() {
        let c = LexiconClassifier::classify("the meeting is at noon");
        assert_eq!(c.label, Label::Negative);
        assert!((c.confidence - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let out = LexiconClassifier
            .classify_batch(&["great", "terrible", "great"])
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].label, Label::Positive);
        assert_eq!(out[1].label, Label::Negative);
        assert_eq!(out[2], out[0]);
    }
}
