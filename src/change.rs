//! Snapshot comparison.

use std::collections::HashMap;

use attendance_core_types::{AttendanceRecord, AttendanceStatus, Snapshot};
use serde::Serialize;

/// A record whose status moved between two snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub subject: String,
    pub previous: AttendanceStatus,
    pub current: AttendanceStatus,
    pub period: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeSet {
    /// First snapshot of the process. Informational, not an alert.
    Initial { records: Vec<AttendanceRecord> },
    Changes {
        updated: Vec<StatusChange>,
        added: Vec<AttendanceRecord>,
        removed: Vec<AttendanceRecord>,
    },
}

impl ChangeSet {
    pub fn is_initial(&self) -> bool {
        matches!(self, ChangeSet::Initial { .. })
    }

    /// True when there is nothing to report.
    pub fn is_empty(&self) -> bool {
        match self {
            ChangeSet::Initial { .. } => false,
            ChangeSet::Changes {
                updated,
                added,
                removed,
            } => updated.is_empty() && added.is_empty() && removed.is_empty(),
        }
    }

    pub fn change_count(&self) -> usize {
        match self {
            ChangeSet::Initial { .. } => 0,
            ChangeSet::Changes {
                updated,
                added,
                removed,
            } => updated.len() + added.len() + removed.len(),
        }
    }
}

type RecordKey<'a> = (&'a str, Option<&'a str>, usize);

/// Records are keyed by subject and period. The ordinal only separates rows
/// that repeat the same subject and period, so a row inserted at the head of
/// a newest-first table does not shift the keys of the rows after it.
fn keyed(snapshot: &Snapshot) -> Vec<(RecordKey<'_>, &AttendanceRecord)> {
    let mut seen: HashMap<(&str, Option<&str>), usize> = HashMap::new();
    snapshot
        .iter()
        .map(|record| {
            let ordinal = seen.entry((record.subject(), record.period())).or_insert(0);
            let key = (record.subject(), record.period(), *ordinal);
            *ordinal += 1;
            (key, record)
        })
        .collect()
}

pub fn diff(previous: Option<&Snapshot>, current: &Snapshot) -> ChangeSet {
    let Some(previous) = previous else {
        return ChangeSet::Initial {
            records: current.records.clone(),
        };
    };

    let before = keyed(previous);
    let after = keyed(current);
    let before_index: HashMap<_, _> = before.iter().cloned().collect();
    let after_index: HashMap<_, _> = after.iter().cloned().collect();

    let mut updated = Vec::new();
    let mut added = Vec::new();
    for (key, record) in &after {
        match before_index.get(key) {
            Some(old) if old.status() != record.status() => updated.push(StatusChange {
                subject: record.subject().to_string(),
                previous: old.status().clone(),
                current: record.status().clone(),
                period: record.period().map(str::to_string),
            }),
            Some(_) => {}
            None => added.push((*record).clone()),
        }
    }

    let removed = before
        .iter()
        .filter(|(key, _)| !after_index.contains_key(key))
        .map(|(_, record)| (*record).clone())
        .collect();

    ChangeSet::Changes {
        updated,
        added,
        removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(rows: &[(&str, &str)]) -> Snapshot {
        Snapshot::new(
            rows.iter()
                .map(|(subject, status)| {
                    AttendanceRecord::new(*subject, AttendanceStatus::classify(status), None)
                })
                .collect(),
        )
    }

    #[test]
    fn first_snapshot_is_initial() {
        let current = snapshot(&[("Math", "present"), ("Art", "absent")]);
        match diff(None, &current) {
            ChangeSet::Initial { records } => assert_eq!(records, current.records),
            other => panic!("expected initial, got {other:?}"),
        }
    }

    #[test]
    fn identical_snapshots_produce_nothing() {
        let s = snapshot(&[("Math", "present"), ("Art", "weird")]);
        let changes = diff(Some(&s), &s.clone());
        assert!(changes.is_empty());
        assert_eq!(changes.change_count(), 0);
    }

    #[test]
    fn single_status_change_is_one_update() {
        let before = snapshot(&[("Math", "present"), ("Art", "absent")]);
        let after = snapshot(&[("Math", "present"), ("Art", "excused")]);
        match diff(Some(&before), &after) {
            ChangeSet::Changes {
                updated,
                added,
                removed,
            } => {
                assert_eq!(updated.len(), 1);
                assert_eq!(updated[0].subject, "Art");
                assert_eq!(updated[0].previous, AttendanceStatus::Absent);
                assert_eq!(updated[0].current, AttendanceStatus::Excused);
                assert!(added.is_empty());
                assert!(removed.is_empty());
            }
            other => panic!("expected changes, got {other:?}"),
        }
    }

    #[test]
    fn reports_added_and_removed_subjects() {
        let before = snapshot(&[("Math", "present"), ("Art", "absent")]);
        let after = snapshot(&[("Math", "present"), ("Music", "late")]);
        let ChangeSet::Changes {
            updated,
            added,
            removed,
        } = diff(Some(&before), &after)
        else {
            panic!("expected changes");
        };
        assert!(updated.is_empty());
        assert_eq!(added[0].subject(), "Music");
        assert_eq!(removed[0].subject(), "Art");
    }

    #[test]
    fn repeated_subjects_are_matched_by_occurrence() {
        let before = snapshot(&[("Juan", "granted"), ("Juan", "granted")]);
        let after = snapshot(&[("Juan", "granted"), ("Juan", "denied"), ("Juan", "granted")]);
        let ChangeSet::Changes {
            updated,
            added,
            removed,
        } = diff(Some(&before), &after)
        else {
            panic!("expected changes");
        };
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].current, AttendanceStatus::Absent);
        assert_eq!(added.len(), 1);
        assert!(removed.is_empty());
    }

    fn dated(rows: &[(&str, &str, &str)]) -> Snapshot {
        Snapshot::new(
            rows.iter()
                .map(|(subject, status, period)| {
                    AttendanceRecord::new(
                        *subject,
                        AttendanceStatus::classify(status),
                        Some(period.to_string()),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn newest_first_insert_is_a_single_addition() {
        let before = dated(&[
            ("Juan", "access granted", "2024-03-01 08:00:00"),
            ("Juan", "access denied", "2024-02-29 17:00:00"),
        ]);
        let after = dated(&[
            ("Juan", "access granted", "2024-03-01 17:02:00"),
            ("Juan", "access granted", "2024-03-01 08:00:00"),
            ("Juan", "access denied", "2024-02-29 17:00:00"),
        ]);
        let ChangeSet::Changes {
            updated,
            added,
            removed,
        } = diff(Some(&before), &after)
        else {
            panic!("expected changes");
        };
        assert!(updated.is_empty(), "unexpected updates: {updated:?}");
        assert!(removed.is_empty());
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].period(), Some("2024-03-01 17:02:00"));
        assert_eq!(added[0].status(), &AttendanceStatus::Present);
    }

    #[test]
    fn status_change_for_same_period_is_an_update() {
        let before = dated(&[("Juan", "absent", "Mon"), ("Juan", "present", "Tue")]);
        let after = dated(&[("Juan", "absent", "Mon"), ("Juan", "late", "Tue")]);
        let ChangeSet::Changes {
            updated,
            added,
            removed,
        } = diff(Some(&before), &after)
        else {
            panic!("expected changes");
        };
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].period.as_deref(), Some("Tue"));
        assert_eq!(updated[0].current, AttendanceStatus::Late);
        assert!(added.is_empty() && removed.is_empty());
    }
}
