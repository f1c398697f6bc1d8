//! Attendance table extraction from HTML pages and DataTables JSON payloads.

use attendance_core_types::{AttendanceRecord, AttendanceStatus, Snapshot, SnapshotSource};
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::default_table_selectors;
use crate::errors::ParseError;
use crate::session::RawPage;

const SUBJECT_KEYWORDS: &[&str] = &["subject", "course", "class", "name", "employee"];
const STATUS_KEYWORDS: &[&str] = &["status", "remarks", "attendance", "result", "access"];
const PERIOD_KEYWORDS: &[&str] = &["date", "time", "period", "session", "schedule"];

static CAPTION_COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\((\d+)\)").unwrap());
static DOTNET_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/Date\((-?\d+)(?:[+-]\d{4})?\)/$").unwrap());

static ROWS: Lazy<Selector> = Lazy::new(|| Selector::parse("tbody > tr").unwrap());
static CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static HEADER_CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("thead th").unwrap());
static ROW_HEADER_CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("th").unwrap());
static FOOTER_CELLS: Lazy<Selector> = Lazy::new(|| Selector::parse("tfoot th").unwrap());
static CAPTION: Lazy<Selector> = Lazy::new(|| Selector::parse("caption").unwrap());
static NOSCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("noscript").unwrap());
static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").unwrap());
static DATA_URL: Lazy<Selector> = Lazy::new(|| Selector::parse("[data-url]").unwrap());

/// Script calls that load rows from the server; capture group 1 is the URL.
static ENDPOINT_CALLS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)fetch\(\s*['"]([^'"]+)['"]"#,
        r#"(?i)\$\.ajax\([^)]*?url\s*:\s*['"]([^'"]+)['"]"#,
        r#"(?i)\$\.(?:getJSON|get|post)\(\s*['"]([^'"]+)['"]"#,
        r#"(?i)\b(?:url|ajax|sAjaxSource)\s*:\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});
const ENDPOINT_HINTS: [&str; 4] = ["attendance", "data", "report", "getdata"];

/// Turns fetched pages into snapshots. Holds no state between calls.
#[derive(Clone, Debug)]
pub struct Extractor {
    table_selectors: Vec<String>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(default_table_selectors())
    }
}

impl Extractor {
    pub fn new(table_selectors: Vec<String>) -> Self {
        Self { table_selectors }
    }

    pub fn extract(&self, page: &RawPage) -> Result<Snapshot, ParseError> {
        if page.is_json() {
            self.extract_json(&page.body)
        } else {
            self.extract_html(&page.body)
        }
    }

    pub fn extract_html(&self, html: &str) -> Result<Snapshot, ParseError> {
        let document = Html::parse_document(html);
        let table = self
            .find_table(&document)
            .ok_or_else(|| ParseError::missing("no attendance table found"))?;

        let mut headers: Vec<String> = table.select(&HEADER_CELLS).map(cell_text).collect();
        let mut rows = Vec::new();
        for row in table.select(&ROWS) {
            let cells: Vec<String> = row.select(&CELLS).map(cell_text).collect();
            if cells.is_empty() {
                // A header row html5ever moved into the body.
                if headers.is_empty() {
                    headers = row.select(&ROW_HEADER_CELLS).map(cell_text).collect();
                }
                continue;
            }
            rows.push(cells);
        }

        let columns = ColumnMap::resolve(&headers, &rows)?;
        let records = columns.records(&rows);

        let reported_total = table
            .select(&CAPTION)
            .next()
            .map(cell_text)
            .and_then(|caption| {
                CAPTION_COUNT
                    .captures(&caption)
                    .and_then(|caps| caps[1].parse().ok())
            });
        let generated_label = table
            .select(&FOOTER_CELLS)
            .nth(1)
            .map(cell_text)
            .filter(|label| !label.is_empty());

        debug!(records = records.len(), headers = ?headers, "parsed attendance table");
        let mut snapshot = Snapshot::new(records);
        snapshot.source = SnapshotSource::Html;
        snapshot.headers = headers;
        snapshot.reported_total = reported_total;
        snapshot.generated_label = generated_label;
        Ok(snapshot)
    }

    pub fn extract_json(&self, body: &str) -> Result<Snapshot, ParseError> {
        let payload: Value = serde_json::from_str(body)
            .map_err(|err| ParseError::missing(format!("invalid JSON payload: {err}")))?;
        let items = data_array(&payload)
            .ok_or_else(|| ParseError::missing("no data array in JSON payload"))?;

        let headers: Vec<String> = match items.first() {
            Some(Value::Object(first)) => first.keys().cloned().collect(),
            _ => Vec::new(),
        };

        let rows: Vec<Vec<String>> = items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(
                    headers
                        .iter()
                        .map(|key| map.get(key).map(|v| json_cell(key, v)).unwrap_or_default())
                        .collect(),
                ),
                Value::Array(values) => Some(values.iter().map(|v| json_cell("", v)).collect()),
                _ => None,
            })
            .collect();

        let columns = ColumnMap::resolve(&headers, &rows)?;
        let records = columns.records(&rows);

        let reported_total = ["recordsTotal", "iTotalRecords", "recordsFiltered"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(Value::as_u64))
            .map(|total| total as usize);

        let mut snapshot = Snapshot::new(records);
        snapshot.source = SnapshotSource::Json;
        snapshot.headers = headers;
        snapshot.reported_total = reported_total;
        Ok(snapshot)
    }

    /// True when the page has no populated attendance table but declares
    /// client-side rendering, i.e. a plain HTTP fetch cannot see the data.
    pub fn requires_javascript(&self, html: &str) -> bool {
        let document = Html::parse_document(html);
        let populated = self
            .find_table(&document)
            .map(|table| {
                table
                    .select(&ROWS)
                    .any(|row| row.select(&CELLS).take(2).count() >= 2)
            })
            .unwrap_or(false);
        if populated {
            return false;
        }

        let has_noscript = document.select(&NOSCRIPT).next().is_some();
        let ajax_table = document.select(&SCRIPT).any(|script| {
            let source = script.text().collect::<String>().to_ascii_lowercase();
            source.contains("serverside") || source.contains("ajax")
        });
        has_noscript || ajax_table
    }

    /// URLs a client-rendered page loads its rows from: script calls in source
    /// order, then `data-url` attributes, without duplicates. Relative URLs
    /// are returned as written.
    pub fn discover_endpoints(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);
        let mut found: Vec<String> = Vec::new();
        let mut push = |candidate: &str| {
            let candidate = candidate.trim();
            let lowered = candidate.to_ascii_lowercase();
            if !candidate.is_empty()
                && ENDPOINT_HINTS.iter().any(|hint| lowered.contains(hint))
                && !found.iter().any(|seen| seen == candidate)
            {
                found.push(candidate.to_string());
            }
        };

        for script in document.select(&SCRIPT) {
            let source = script.text().collect::<String>();
            let mut calls: Vec<(usize, &str)> = ENDPOINT_CALLS
                .iter()
                .flat_map(|pattern| pattern.captures_iter(&source))
                .filter_map(|capture| capture.get(1))
                .map(|url| (url.start(), url.as_str()))
                .collect();
            calls.sort_by_key(|(start, _)| *start);
            for (_, url) in calls {
                push(url);
            }
        }
        for element in document.select(&DATA_URL) {
            if let Some(url) = element.value().attr("data-url") {
                push(url);
            }
        }
        debug!(endpoints = found.len(), "scanned page for data endpoints");
        found
    }

    fn find_table<'a>(&self, document: &'a Html) -> Option<ElementRef<'a>> {
        self.table_selectors.iter().find_map(|css| match Selector::parse(css) {
            Ok(selector) => document.select(&selector).next(),
            Err(err) => {
                warn!(selector = %css, %err, "skipping invalid table selector");
                None
            }
        })
    }
}

/// Whitespace-normalized text of all descendant text nodes.
fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn data_array(payload: &Value) -> Option<&Vec<Value>> {
    match payload {
        Value::Array(items) => Some(items),
        Value::Object(map) => ["data", "aaData", "rows"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .or_else(|| map.values().find_map(Value::as_array)),
        _ => None,
    }
}

fn json_cell(key: &str, value: &Value) -> String {
    let access_flag = key.to_ascii_lowercase().starts_with("access");
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "present".to_string(),
        Value::Bool(false) => "absent".to_string(),
        Value::Number(n) if access_flag && n.as_i64() == Some(1) => "granted".to_string(),
        Value::Number(n) if access_flag && n.as_i64() == Some(0) => "denied".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format_dotnet_date(s).unwrap_or_else(|| s.trim().to_string()),
        other => other.to_string(),
    }
}

/// `/Date(1730592000000)/` as `2024-11-03 00:00:00` (UTC).
fn format_dotnet_date(raw: &str) -> Option<String> {
    let caps = DOTNET_DATE.captures(raw.trim())?;
    let millis: i64 = caps[1].parse().ok()?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[derive(Debug, PartialEq, Eq)]
struct ColumnMap {
    subject: usize,
    status: usize,
    period: Option<usize>,
}

impl ColumnMap {
    fn resolve(headers: &[String], rows: &[Vec<String>]) -> Result<Self, ParseError> {
        let width = rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(headers.len());
        if width < 2 {
            return Err(ParseError::missing(format!(
                "table has {width} column(s); subject and status are required"
            )));
        }

        let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
        let mut used = Vec::new();
        let subject = keyword_column(&lowered, SUBJECT_KEYWORDS, &mut used);
        let status = keyword_column(&lowered, STATUS_KEYWORDS, &mut used);
        let period = keyword_column(&lowered, PERIOD_KEYWORDS, &mut used);

        let subject = subject.unwrap_or_else(|| positional(0, width, &mut used));
        let status = status.unwrap_or_else(|| positional(1, width, &mut used));
        let period = period.or_else(|| {
            (headers.is_empty() && width > 2 && !used.contains(&2)).then_some(2)
        });
        Ok(Self {
            subject,
            status,
            period,
        })
    }

    fn records(&self, rows: &[Vec<String>]) -> Vec<AttendanceRecord> {
        let required = self.subject.max(self.status);
        rows.iter()
            .filter(|cells| cells.len() > required)
            .map(|cells| {
                AttendanceRecord::new(
                    cells[self.subject].clone(),
                    AttendanceStatus::classify(&cells[self.status]),
                    self.period.and_then(|idx| cells.get(idx).cloned()),
                )
            })
            .collect()
    }
}

fn keyword_column(headers: &[String], keywords: &[&str], used: &mut Vec<usize>) -> Option<usize> {
    let found = headers
        .iter()
        .enumerate()
        .find(|(idx, header)| !used.contains(idx) && keywords.iter().any(|k| header.contains(k)))
        .map(|(idx, _)| idx);
    if let Some(idx) = found {
        used.push(idx);
    }
    found
}

fn positional(preferred: usize, width: usize, used: &mut Vec<usize>) -> usize {
    let idx = if used.contains(&preferred) {
        (0..width).find(|idx| !used.contains(idx)).unwrap_or(preferred)
    } else {
        preferred
    };
    used.push(idx);
    idx
}
