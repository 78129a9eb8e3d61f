//! Per-stream resume position.
//!
//! Monotonic sources (Discord snowflakes, X tweet ids) keep a high-watermark.
//! Streams without monotonic ids (Bluesky mention notifications) keep a
//! bounded window of recently processed ids together with a counter of every
//! id ever admitted, which makes "newer than" decidable for the window too.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Source;
use crate::CoreError;

/// Number of ids retained by a [`Cursor::RecentIds`] window.
pub const DEFAULT_RECENT_WINDOW: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// Highest processed id of a monotonic stream.
    HighWatermark { id: u64 },
    /// Recently processed ids, oldest first, and the total number admitted.
    RecentIds { ids: Vec<String>, seen: u64 },
}

impl Cursor {
    /// Returns `true` when `self` is the same position as `other` or later.
    ///
    /// Cursors of different kinds never dominate each other.
    #[must_use]
    pub fn dominates(&self, other: &Cursor) -> bool {
        match (self, other) {
            (Cursor::HighWatermark { id: a }, Cursor::HighWatermark { id: b }) => a >= b,
            (
                Cursor::RecentIds {
                    ids: a_ids,
                    seen: a_seen,
                },
                Cursor::RecentIds {
                    ids: b_ids,
                    seen: b_seen,
                },
            ) => {
                if a_seen < b_seen {
                    return false;
                }
                let added = usize::try_from(a_seen - b_seen).unwrap_or(usize::MAX);
                // Ids in `a` older than the newly admitted ones must be the
                // newest ids of `b`, in the same order.
                let retained = a_ids.len().saturating_sub(added);
                if retained > b_ids.len() {
                    return false;
                }
                a_ids[..retained] == b_ids[b_ids.len() - retained..]
            }
            _ => false,
        }
    }

    /// Returns `true` if a record with `record_id` is at or before this cursor.
    ///
    /// A non-numeric id never compares as covered by a watermark; callers
    /// reject such ids separately.
    #[must_use]
    pub fn covers(&self, record_id: &str) -> bool {
        match self {
            Cursor::HighWatermark { id } => record_id
                .parse::<u64>()
                .is_ok_and(|candidate| candidate <= *id),
            Cursor::RecentIds { ids, .. } => ids.iter().any(|seen| seen == record_id),
        }
    }

    /// The watermark value, if this is a watermark cursor.
    #[must_use]
    pub fn watermark(&self) -> Option<u64> {
        match self {
            Cursor::HighWatermark { id } => Some(*id),
            Cursor::RecentIds { .. } => None,
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::HighWatermark { id } => write!(f, "watermark:{id}"),
            Cursor::RecentIds { ids, seen } => {
                write!(f, "recent:{seen}")?;
                if let Some(last) = ids.last() {
                    write!(f, " (last {last})")?;
                }
                Ok(())
            }
        }
    }
}

/// Compute the cursor that results from marking `record_id` as processed.
///
/// Starting from no cursor, monotonic sources get a watermark and the others
/// a single-entry window. Advancing never moves a cursor backwards: a
/// watermark stays put for an older id, and a window ignores ids it already
/// holds.
///
/// # Errors
///
/// Returns [`CoreError::MalformedRecordId`] if `source` has monotonic ids and
/// `record_id` is not numeric, or [`CoreError::CursorKindMismatch`] if the
/// existing cursor has the wrong kind for `source`.
pub fn advance_cursor(
    current: Option<&Cursor>,
    source: Source,
    record_id: &str,
    window: usize,
) -> Result<Cursor, CoreError> {
    let window = window.max(1);
    if source.has_monotonic_ids() {
        let id = record_id
            .parse::<u64>()
            .map_err(|_| CoreError::MalformedRecordId {
                source_name: source.to_string(),
                record_id: record_id.to_string(),
            })?;
        return match current {
            None => Ok(Cursor::HighWatermark { id }),
            Some(Cursor::HighWatermark { id: existing }) => Ok(Cursor::HighWatermark {
                id: id.max(*existing),
            }),
            Some(Cursor::RecentIds { .. }) => Err(CoreError::CursorKindMismatch(source.to_string())),
        };
    }

    match current {
        None => Ok(Cursor::RecentIds {
            ids: vec![record_id.to_string()],
            seen: 1,
        }),
        Some(Cursor::RecentIds { ids, seen }) => {
            if ids.iter().any(|existing| existing == record_id) {
                return Ok(Cursor::RecentIds {
                    ids: ids.clone(),
                    seen: *seen,
                });
            }
            let mut ids = ids.clone();
            ids.push(record_id.to_string());
            if ids.len() > window {
                let overflow = ids.len() - window;
                ids.drain(..overflow);
            }
            Ok(Cursor::RecentIds {
                ids,
                seen: seen.saturating_add(1),
            })
        }
        Some(Cursor::HighWatermark { .. }) => Err(CoreError::CursorKindMismatch(source.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recent(ids: &[&str], seen: u64) -> Cursor {
        Cursor::RecentIds {
            ids: ids.iter().map(|s| (*s).to_string()).collect(),
            seen,
        }
    }

    #[test]
    fn watermark_dominates_equal_and_lower() {
        let a = Cursor::HighWatermark { id: 10 };
        assert!(a.dominates(&Cursor::HighWatermark { id: 10 }));
        assert!(a.dominates(&Cursor::HighWatermark { id: 3 }));
        assert!(!a.dominates(&Cursor::HighWatermark { id: 11 }));
    }

    #[test]
    fn different_kinds_never_dominate() {
        let w = Cursor::HighWatermark { id: 1 };
        let r = recent(&["a"], 1);
        assert!(!w.dominates(&r));
        assert!(!r.dominates(&w));
    }

    #[test]
    fn window_with_appended_ids_dominates_its_predecessor() {
        let old = recent(&["a", "b"], 2);
        let new = recent(&["a", "b", "c"], 3);
        assert!(new.dominates(&old));
        assert!(!old.dominates(&new));
    }

    #[test]
    fn truncated_window_still_dominates() {
        let old = recent(&["a", "b", "c"], 3);
        let new = recent(&["c", "d", "e"], 5);
        assert!(new.dominates(&old));
    }

    #[test]
    fn rewritten_history_does_not_dominate() {
        let old = recent(&["a", "b"], 2);
        let forged = recent(&["x", "b", "c"], 3);
        assert!(!forged.dominates(&old));
    }

    #[test]
    fn covers_watermark_by_numeric_order() {
        let c = Cursor::HighWatermark { id: 100 };
        assert!(c.covers("99"));
        assert!(c.covers("100"));
        assert!(!c.covers("101"));
        assert!(!c.covers("not-a-number"));
    }

    #[test]
    fn covers_window_by_membership() {
        let c = recent(&["at://a", "at://b"], 2);
        assert!(c.covers("at://a"));
        assert!(!c.covers("at://z"));
    }

    #[test]
    fn advance_starts_watermark_for_monotonic_source() {
        let c = advance_cursor(None, Source::Discord, "42", 10).unwrap();
        assert_eq!(c, Cursor::HighWatermark { id: 42 });
    }

    #[test]
    fn advance_never_lowers_watermark() {
        let current = Cursor::HighWatermark { id: 50 };
        let c = advance_cursor(Some(&current), Source::X, "42", 10).unwrap();
        assert_eq!(c, current);
    }

    #[test]
    fn advance_rejects_non_numeric_id_for_monotonic_source() {
        let err = advance_cursor(None, Source::Discord, "abc", 10).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecordId { .. }));
    }

    #[test]
    fn advance_window_evicts_oldest_and_counts() {
        let current = recent(&["a", "b"], 7);
        let c = advance_cursor(Some(&current), Source::Bluesky, "c", 2).unwrap();
        assert_eq!(c, recent(&["b", "c"], 8));
        assert!(c.dominates(&current));
    }

    #[test]
    fn advance_window_ignores_known_id() {
        let current = recent(&["a", "b"], 2);
        let c = advance_cursor(Some(&current), Source::Bluesky, "a", 10).unwrap();
        assert_eq!(c, current);
    }

    #[test]
    fn cursor_round_trips_through_json_tag() {
        let json = serde_json::to_value(Cursor::HighWatermark { id: 5 }).unwrap();
        assert_eq!(json["kind"], "high_watermark");
        assert_eq!(json["id"], 5);
    }
}
