//! Which of a snapshot's records fall on the current day.

use attendance_core_types::{AttendanceRecord, Snapshot};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

const DATETIME_FORMATS: [&str; 4] = [
    "%m/%d/%Y %I:%M:%S %p",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TodaySummary {
    pub date: NaiveDate,
    pub total_records: usize,
    pub entries: Vec<AttendanceRecord>,
}

impl TodaySummary {
    pub fn compute(snapshot: &Snapshot, today: NaiveDate) -> Self {
        let entries = snapshot
            .iter()
            .filter(|record| record_date(record) == Some(today))
            .cloned()
            .collect();
        Self {
            date: today,
            total_records: snapshot.len(),
            entries,
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

/// The calendar day of a record's period, when the period reads as a date.
pub fn record_date(record: &AttendanceRecord) -> Option<NaiveDate> {
    parse_date(record.period()?)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|ts| ts.date())
        .or_else(|| {
            // Periods like "2025-11-03 08:01 (late)" still lead with the day.
            let head = raw.split_whitespace().next()?;
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
        })
}
