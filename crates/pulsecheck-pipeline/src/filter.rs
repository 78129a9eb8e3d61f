//! Selection of scored records worth publishing.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use pulsecheck_core::{Label, PostingKey, Record, SentimentResult, TargetPlatform};

#[derive(Debug, Clone)]
pub struct SelectionCriteria {
    /// Minimum confidence for a POSITIVE result, inclusive.
    pub threshold: f64,
    /// Maximum record age at selection time, inclusive.
    pub max_age: Duration,
    /// Maximum number of records selected per run.
    pub cap: usize,
    /// Platforms the records would be published to.
    pub targets: Vec<TargetPlatform>,
}

/// Targets in `criteria` that have no posting record for `record` yet.
#[must_use]
pub fn pending_targets(
    record: &Record,
    targets: &[TargetPlatform],
    posted: &HashSet<PostingKey>,
) -> Vec<TargetPlatform> {
    targets
        .iter()
        .copied()
        .filter(|t| !posted.contains(&PostingKey::new(record.source, &record.record_id, *t)))
        .collect()
}

/// Keep positive, confident, recent records with at least one target still
/// unposted.
///
/// Input order is preserved. When more than `criteria.cap` qualify, the
/// highest-confidence ones win (ties go to the earlier `created_at`) and are
/// emitted in their original order.
#[must_use]
pub fn select(
    scored: &[(Record, SentimentResult)],
    criteria: &SelectionCriteria,
    now: DateTime<Utc>,
    posted: &HashSet<PostingKey>,
) -> Vec<(Record, SentimentResult)> {
    let eligible: Vec<usize> = scored
        .iter()
        .enumerate()
        .filter(|(_, (record, result))| {
            result.label == Label::Positive
                && result.confidence >= criteria.threshold
                && now - record.created_at <= criteria.max_age
                && !pending_targets(record, &criteria.targets, posted).is_empty()
        })
        .map(|(i, _)| i)
        .collect();

    let keep: Vec<usize> = if eligible.len() > criteria.cap {
        let mut ranked = eligible;
        ranked.sort_by(|&a, &b| {
            let (ra, sa) = &scored[a];
            let (rb, sb) = &scored[b];
            sb.confidence
                .total_cmp(&sa.confidence)
                .then(ra.created_at.cmp(&rb.created_at))
                .then(a.cmp(&b))
        });
        ranked.truncate(criteria.cap);
        ranked.sort_unstable();
        ranked
    } else {
        eligible
    };

    keep.into_iter().map(|i| scored[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulsecheck_core::Source;

    fn entry(id: &str, label: Label, confidence: f64, age_hours: i64) -> (Record, SentimentResult) {
        let now = fixed_now();
        (
            Record {
                source: Source::Discord,
                stream_id: "c".to_string(),
                record_id: id.to_string(),
                text: format!("text {id}"),
                created_at: now - Duration::hours(age_hours),
                author: "a".to_string(),
            },
            SentimentResult {
                source: Source::Discord,
                record_id: id.to_string(),
                label,
                confidence,
                topics: vec![],
            },
        )
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-08T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn criteria(threshold: f64, cap: usize) -> SelectionCriteria {
        SelectionCriteria {
            threshold,
            max_age: Duration::days(7),
            cap,
            targets: vec![TargetPlatform::X],
        }
    }

    fn ids(selected: &[(Record, SentimentResult)]) -> Vec<&str> {
        selected.iter().map(|(r, _)| r.record_id.as_str()).collect()
    }

    #[test]
    fn keeps_confident_positives_in_input_order() {
        let scored = vec![
            entry("a", Label::Positive, 0.51, 1),
            entry("b", Label::Positive, 0.9, 1),
            entry("c", Label::Positive, 0.99, 1),
        ];
        let out = select(&scored, &criteria(0.7, 5), fixed_now(), &HashSet::new());
        assert_eq!(ids(&out), vec!["b", "c"]);
    }

    #[test]
    fn cap_keeps_highest_confidence() {
        let scored = vec![
            entry("a", Label::Positive, 0.51, 1),
            entry("b", Label::Positive, 0.9, 1),
            entry("c", Label::Positive, 0.99, 1),
        ];
        let out = select(&scored, &criteria(0.7, 1), fixed_now(), &HashSet::new());
        assert_eq!(ids(&out), vec!["c"]);
    }

    #[test]
    fn cap_ties_prefer_earlier_records_and_reemit_in_input_order() {
        let scored = vec![
            entry("newer", Label::Positive, 0.9, 1),
            entry("best", Label::Positive, 0.95, 2),
            entry("older", Label::Positive, 0.9, 5),
        ];
        let out = select(&scored, &criteria(0.8, 2), fixed_now(), &HashSet::new());
        assert_eq!(ids(&out), vec!["best", "older"]);
    }

    #[test]
    fn threshold_is_inclusive_and_negatives_are_dropped() {
        let scored = vec![
            entry("edge", Label::Positive, 0.8, 1),
            entry("neg", Label::Negative, 0.99, 1),
        ];
        let out = select(&scored, &criteria(0.8, 5), fixed_now(), &HashSet::new());
        assert_eq!(ids(&out), vec!["edge"]);
    }

    #[test]
    fn stale_records_are_dropped() {
        let scored = vec![
            entry("fresh", Label::Positive, 0.9, 24 * 7),
            entry("old", Label::Positive, 0.9, 24 * 7 + 1),
        ];
        let out = select(&scored, &criteria(0.8, 5), fixed_now(), &HashSet::new());
        assert_eq!(ids(&out), vec!["fresh"]);
    }

    #[test]
    fn fully_posted_records_are_dropped() {
        let scored = vec![entry("done", Label::Positive, 0.9, 1), entry("todo", Label::Positive, 0.9, 1)];
        let posted: HashSet<PostingKey> =
            [PostingKey::new(Source::Discord, "done", TargetPlatform::X)].into();
        let out = select(&scored, &criteria(0.8, 5), fixed_now(), &posted);
        assert_eq!(ids(&out), vec!["todo"]);
    }

    #[test]
    fn partially_posted_records_stay_eligible() {
        let scored = vec![entry("half", Label::Positive, 0.9, 1)];
        let posted: HashSet<PostingKey> =
            [PostingKey::new(Source::Discord, "half", TargetPlatform::X)].into();
        let mut both = criteria(0.8, 5);
        both.targets = vec![TargetPlatform::X, TargetPlatform::Bluesky];

        let out = select(&scored, &both, fixed_now(), &posted);
        assert_eq!(ids(&out), vec!["half"]);
        assert_eq!(
            pending_targets(&out[0].0, &both.targets, &posted),
            vec![TargetPlatform::Bluesky]
        );
    }
}
