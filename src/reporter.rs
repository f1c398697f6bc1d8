//! Operator-facing output sinks.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use attendance_core_types::{AttendanceRecord, Snapshot};
use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::change::ChangeSet;
use crate::errors::CycleError;
use crate::summary::TodaySummary;

#[derive(Clone, Debug, PartialEq)]
pub enum ReportEvent {
    Snapshot {
        cycle: u32,
        snapshot: Snapshot,
        changes: ChangeSet,
    },
    Failure {
        cycle: u32,
        error: CycleError,
        fatal: bool,
    },
}

#[derive(Debug, Error)]
pub enum ReporterError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("encoding error: {0}")]
    Encode(String),
}

pub trait Reporter: Send {
    fn report(&mut self, event: &ReportEvent) -> Result<(), ReporterError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Human,
    Json,
    Yaml,
}

/// Serialized shape of an event for the JSON and YAML formats.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum Envelope<'a> {
    Snapshot {
        cycle: u32,
        captured_at: String,
        reported_total: Option<usize>,
        generated_label: Option<&'a str>,
        records: &'a [AttendanceRecord],
        changes: &'a ChangeSet,
        today: TodaySummary,
    },
    Failure {
        cycle: u32,
        kind: &'static str,
        message: String,
        fatal: bool,
        hint: Option<&'static str>,
    },
}

impl<'a> Envelope<'a> {
    fn new(event: &'a ReportEvent, today: NaiveDate) -> Self {
        match event {
            ReportEvent::Snapshot {
                cycle,
                snapshot,
                changes,
            } => Envelope::Snapshot {
                cycle: *cycle,
                captured_at: snapshot.captured_at.to_rfc3339(),
                reported_total: snapshot.reported_total,
                generated_label: snapshot.generated_label.as_deref(),
                records: &snapshot.records,
                changes,
                today: TodaySummary::compute(snapshot, today),
            },
            ReportEvent::Failure {
                cycle,
                error,
                fatal,
            } => Envelope::Failure {
                cycle: *cycle,
                kind: error.kind(),
                message: error.to_string(),
                fatal: *fatal,
                hint: error.hint(),
            },
        }
    }
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

/// Writes events to stdout, or any writer.
pub struct ConsoleReporter {
    out: Box<dyn Write + Send>,
    format: ReportFormat,
    today: Option<NaiveDate>,
}

impl ConsoleReporter {
    pub fn stdout(format: ReportFormat) -> Self {
        Self::new(Box::new(io::stdout()), format)
    }

    pub fn new(out: Box<dyn Write + Send>, format: ReportFormat) -> Self {
        Self {
            out,
            format,
            today: None,
        }
    }

    /// Pins the day used for the today summary instead of the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn write_human(&mut self, event: &ReportEvent) -> io::Result<()> {
        match event {
            ReportEvent::Snapshot {
                cycle,
                snapshot,
                changes,
            } => {
                let stamp = snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC");
                match changes {
                    ChangeSet::Initial { records } => {
                        writeln!(
                            self.out,
                            "[cycle {cycle}] {stamp}: baseline with {} record(s)",
                            records.len()
                        )?;
                        for record in records {
                            writeln!(self.out, "  {record}")?;
                        }
                    }
                    ChangeSet::Changes {
                        updated,
                        added,
                        removed,
                    } => {
                        writeln!(
                            self.out,
                            "[cycle {cycle}] {stamp}: {} change(s)",
                            changes.change_count()
                        )?;
                        for change in updated {
                            write!(
                                self.out,
                                "  ~ {}: {} -> {}",
                                change.subject, change.previous, change.current
                            )?;
                            match &change.period {
                                Some(period) => writeln!(self.out, " ({period})")?,
                                None => writeln!(self.out)?,
                            }
                        }
                        for record in added {
                            writeln!(self.out, "  + {record}")?;
                        }
                        for record in removed {
                            writeln!(self.out, "  - {record}")?;
                        }
                    }
                }
                if let Some(total) = snapshot.reported_total {
                    writeln!(self.out, "  portal reports {total} record(s)")?;
                }
                if let Some(label) = &snapshot.generated_label {
                    writeln!(self.out, "  {label}")?;
                }
                let day = self.today.unwrap_or_else(local_today);
                let today = TodaySummary::compute(snapshot, day);
                writeln!(
                    self.out,
                    "  today ({}): {} of {} record(s)",
                    today.date,
                    today.count(),
                    today.total_records
                )?;
                for record in &today.entries {
                    writeln!(self.out, "    {record}")?;
                }
            }
            ReportEvent::Failure {
                cycle,
                error,
                fatal,
            } => {
                let severity = if *fatal { "fatal" } else { "failed" };
                writeln!(
                    self.out,
                    "[cycle {cycle}] {severity} ({}): {error}",
                    error.kind()
                )?;
                if let Some(hint) = error.hint() {
                    writeln!(self.out, "  hint: {hint}")?;
                }
            }
        }
        Ok(())
    }
}

impl Reporter for ConsoleReporter {
    fn report(&mut self, event: &ReportEvent) -> Result<(), ReporterError> {
        let today = self.today.unwrap_or_else(local_today);
        match self.format {
            ReportFormat::Human => self.write_human(event)?,
            ReportFormat::Json => {
                let line = serde_json::to_string(&Envelope::new(event, today))
                    .map_err(|err| ReporterError::Encode(err.to_string()))?;
                writeln!(self.out, "{line}")?;
            }
            ReportFormat::Yaml => {
                let doc = serde_yaml::to_string(&Envelope::new(event, today))
                    .map_err(|err| ReporterError::Encode(err.to_string()))?;
                writeln!(self.out, "---\n{}", doc.trim_end())?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Writes a CSV and a JSON file per reported snapshot, sharing one file stem.
pub struct SnapshotExporter {
    dir: PathBuf,
    today: Option<NaiveDate>,
}

impl SnapshotExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            today: None,
        }
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `attendance_<baseline|updated>_<utc stamp with millis>_c<cycle>`.
    fn stem(cycle: u32, initial: bool) -> String {
        let prefix = if initial { "baseline" } else { "updated" };
        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        format!("attendance_{prefix}_{stamp}_c{cycle}")
    }

    fn write(&self, event: &ReportEvent) -> Result<Option<PathBuf>, ReporterError> {
        let ReportEvent::Snapshot {
            cycle,
            snapshot,
            changes,
        } = event
        else {
            return Ok(None);
        };
        fs::create_dir_all(&self.dir)?;
        let stem = Self::stem(*cycle, changes.is_initial());
        let csv_path = self.dir.join(format!("{stem}.csv"));

        let mut wtr = csv::Writer::from_path(&csv_path)?;
        wtr.write_record(["subject", "status", "period"])?;
        for record in snapshot.iter() {
            wtr.write_record([
                record.subject(),
                record.status().label(),
                record.period().unwrap_or(""),
            ])?;
        }
        wtr.flush()?;

        let today = self.today.unwrap_or_else(local_today);
        let json = serde_json::to_vec_pretty(&Envelope::new(event, today))
            .map_err(|err| ReporterError::Encode(err.to_string()))?;
        fs::write(self.dir.join(format!("{stem}.json")), json)?;
        Ok(Some(csv_path))
    }
}

impl Reporter for SnapshotExporter {
    fn report(&mut self, event: &ReportEvent) -> Result<(), ReporterError> {
        if let Some(path) = self.write(event)? {
            info!(path = %path.display(), "exported attendance snapshot");
        }
        Ok(())
    }
}

/// Sends every event to each sink. A failing sink is logged and skipped.
#[derive(Default)]
pub struct FanoutReporter {
    sinks: Vec<Box<dyn Reporter>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn Reporter>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Reporter for FanoutReporter {
    fn report(&mut self, event: &ReportEvent) -> Result<(), ReporterError> {
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(err) = sink.report(event) {
                warn!(sink = index, %err, "reporter failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::diff;
    use crate::errors::AuthError;
    use attendance_core_types::AttendanceStatus;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    struct Failing;

    impl Reporter for Failing {
        fn report(&mut self, _event: &ReportEvent) -> Result<(), ReporterError> {
            Err(ReporterError::Encode("boom".into()))
        }
    }

    fn snapshot(status: &str) -> Snapshot {
        Snapshot::new(vec![
            AttendanceRecord::new("Math", AttendanceStatus::Present, Some("Mon".into())),
            AttendanceRecord::new("Art", AttendanceStatus::classify(status), None),
        ])
    }

    fn initial_event() -> ReportEvent {
        let snap = snapshot("absent");
        ReportEvent::Snapshot {
            cycle: 1,
            changes: diff(None, &snap),
            snapshot: snap,
        }
    }

    #[test]
    fn human_output_lists_changes() {
        let buf = SharedBuf::default();
        let mut reporter = ConsoleReporter::new(Box::new(buf.clone()), ReportFormat::Human);
        let before = snapshot("absent");
        let after = snapshot("late");
        reporter
            .report(&ReportEvent::Snapshot {
                cycle: 2,
                changes: diff(Some(&before), &after),
                snapshot: after,
            })
            .unwrap();
        let text = buf.text();
        assert!(text.contains("1 change(s)"));
        assert!(text.contains("~ Art: absent -> late"));
    }

    #[test]
    fn json_failure_carries_kind_and_hint() {
        let buf = SharedBuf::default();
        let mut reporter = ConsoleReporter::new(Box::new(buf.clone()), ReportFormat::Json);
        reporter
            .report(&ReportEvent::Failure {
                cycle: 3,
                error: AuthError::JavaScriptRequired.into(),
                fatal: true,
            })
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(buf.text().trim()).unwrap();
        assert_eq!(value["event"], "failure");
        assert_eq!(value["kind"], "javascript_required");
        assert_eq!(value["fatal"], true);
        assert!(value["hint"].as_str().unwrap().contains("browser"));
    }

    #[test]
    fn yaml_snapshot_is_a_document() {
        let buf = SharedBuf::default();
        let mut reporter = ConsoleReporter::new(Box::new(buf.clone()), ReportFormat::Yaml);
        reporter.report(&initial_event()).unwrap();
        let text = buf.text();
        assert!(text.starts_with("---\n"));
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(doc["event"], serde_yaml::Value::from("snapshot"));
        assert_eq!(doc["changes"]["kind"], serde_yaml::Value::from("initial"));
    }

    fn exported(dir: &Path, extension: &str) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
            .collect();
        files.sort();
        files
    }

    fn march_4() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
    }

    #[test]
    fn exporter_writes_baseline_csv_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = SnapshotExporter::new(dir.path().join("exports"));
        exporter.report(&initial_event()).unwrap();

        let csvs = exported(exporter.dir(), "csv");
        assert_eq!(csvs.len(), 1);
        let name = csvs[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("attendance_baseline_"));
        assert!(name.ends_with("_c1.csv"));
        let content = fs::read_to_string(&csvs[0]).unwrap();
        assert_eq!(content, "subject,status,period\nMath,present,Mon\nArt,absent,\n");

        let jsons = exported(exporter.dir(), "json");
        assert_eq!(jsons.len(), 1);
        assert_eq!(jsons[0].file_stem(), csvs[0].file_stem());
        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&jsons[0]).unwrap()).unwrap();
        assert_eq!(value["cycle"], 1);
        assert_eq!(value["records"].as_array().unwrap().len(), 2);
        assert_eq!(value["changes"]["kind"], "initial");
    }

    #[test]
    fn back_to_back_exports_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = SnapshotExporter::new(dir.path());
        let before = snapshot("absent");
        let after = snapshot("late");
        exporter.report(&initial_event()).unwrap();
        exporter
            .report(&ReportEvent::Snapshot {
                cycle: 2,
                changes: diff(Some(&before), &after),
                snapshot: after.clone(),
            })
            .unwrap();
        exporter
            .report(&ReportEvent::Snapshot {
                cycle: 3,
                changes: diff(Some(&after), &before),
                snapshot: before,
            })
            .unwrap();

        assert_eq!(exported(dir.path(), "csv").len(), 3);
        assert_eq!(exported(dir.path(), "json").len(), 3);
    }

    #[test]
    fn exporter_ignores_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = SnapshotExporter::new(dir.path());
        exporter
            .report(&ReportEvent::Failure {
                cycle: 1,
                error: AuthError::Timeout.into(),
                fatal: false,
            })
            .unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    fn dated_event() -> ReportEvent {
        let snap = Snapshot::new(vec![
            AttendanceRecord::new("Math", AttendanceStatus::Present, Some("2024-03-04 08:01".into())),
            AttendanceRecord::new("Art", AttendanceStatus::Late, Some("03/03/2024".into())),
        ]);
        ReportEvent::Snapshot {
            cycle: 1,
            changes: diff(None, &snap),
            snapshot: snap,
        }
    }

    #[test]
    fn human_output_summarises_today() {
        let buf = SharedBuf::default();
        let mut reporter =
            ConsoleReporter::new(Box::new(buf.clone()), ReportFormat::Human).with_today(march_4());
        reporter.report(&dated_event()).unwrap();
        let text = buf.text();
        assert!(text.contains("today (2024-03-04): 1 of 2 record(s)"));
    }

    #[test]
    fn json_snapshot_carries_today_entries() {
        let buf = SharedBuf::default();
        let mut reporter =
            ConsoleReporter::new(Box::new(buf.clone()), ReportFormat::Json).with_today(march_4());
        reporter.report(&dated_event()).unwrap();
        let value: serde_json::Value = serde_json::from_str(buf.text().trim()).unwrap();
        assert_eq!(value["today"]["date"], "2024-03-04");
        assert_eq!(value["today"]["total_records"], 2);
        assert_eq!(value["today"]["entries"][0]["subject"], "Math");
    }

    #[test]
    fn fanout_survives_failing_sink() {
        let buf = SharedBuf::default();
        let mut fanout = FanoutReporter::new()
            .with(Box::new(Failing))
            .with(Box::new(ConsoleReporter::new(
                Box::new(buf.clone()),
                ReportFormat::Human,
            )));
        assert_eq!(fanout.len(), 2);
        fanout.report(&initial_event()).unwrap();
        assert!(buf.text().contains("baseline with 2 record(s)"));
    }
}
