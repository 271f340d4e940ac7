//! Environmental data recorded by the ISIIS alongside the images.
//!
//! `ISIIS*.txt` files start with a 10-line header whose second line holds
//! the acquisition date, followed by a tab-separated table whose `Time`
//! column only has times of day.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{debug, warn};

use crate::consts::ENVIRON_HEADER_LINES;
use crate::error::{ApeepError, Result};

const TIME_COLUMN: &str = "Time";
const MISSING_VALUES: [&str; 3] = ["NA", "NaN", "No GPS Data"];
const HEADER_DATE_FORMAT: &str = "%m/%d/%y";
const TIME_FORMAT: &str = "%H:%M:%S%.f";

/// One row of environmental data.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvironmentRecord {
    pub time: NaiveDateTime,
    /// Values in the order of [`EnvironmentTable::columns`]; `None` when
    /// missing.
    pub values: Vec<Option<String>>,
}

/// Environmental records of a whole transect, sorted by time.
#[derive(Clone, Debug, Default)]
pub struct EnvironmentTable {
    pub columns: Vec<String>,
    pub records: Vec<EnvironmentRecord>,
}

impl EnvironmentTable {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether every present value of column `index` parses as a number.
    pub fn column_is_numeric(&self, index: usize) -> bool {
        self.records
            .iter()
            .filter_map(|r| r.values.get(index).and_then(|v| v.as_deref()))
            .all(|v| v.parse::<f64>().is_ok())
    }

    /// Record closest in time to `time`, if within `tolerance_s` seconds.
    /// Ties go to the earlier record.
    pub fn nearest(&self, time: NaiveDateTime, tolerance_s: f64) -> Option<&EnvironmentRecord> {
        let idx = self.records.partition_point(|r| r.time < time);
        let before = idx.checked_sub(1).and_then(|i| self.records.get(i));
        let after = self.records.get(idx);

        let distance = |r: &EnvironmentRecord| (r.time - time).abs();
        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if distance(a) < distance(b) {
                    a
                } else {
                    b
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };

        let tolerance = Duration::nanoseconds((tolerance_s * 1e9).round() as i64);
        (distance(best) <= tolerance).then_some(best)
    }

    /// Append the records of `other`, matching columns by name. Columns
    /// unknown to `self` are ignored.
    fn extend(&mut self, other: EnvironmentTable) {
        if self.columns.is_empty() {
            *self = other;
            return;
        }
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|c| other.columns.iter().position(|o| o == c))
            .collect();
        for record in other.records {
            let values = mapping
                .iter()
                .map(|m| m.and_then(|i| record.values.get(i).cloned().flatten()))
                .collect();
            self.records.push(EnvironmentRecord {
                time: record.time,
                values,
            });
        }
    }
}

/// Read one ISIIS environmental text file.
pub fn read_environ(path: &Path) -> Result<EnvironmentTable> {
    let bytes = std::fs::read(path)?;
    // Files are latin-1 encoded: every byte is one code point.
    let text: String = bytes.iter().map(|&b| b as char).collect();
    let mut lines = text.lines();

    let header: Vec<&str> = lines.by_ref().take(ENVIRON_HEADER_LINES).collect();
    if header.len() < ENVIRON_HEADER_LINES {
        return Err(env_error(path, "truncated header"));
    }
    let date_field = header[1]
        .get(6..14)
        .ok_or_else(|| env_error(path, "no date in header"))?;
    let date = NaiveDate::parse_from_str(date_field, HEADER_DATE_FORMAT)
        .map_err(|e| env_error(path, &format!("bad header date {date_field:?} ({e})")))?;

    let columns: Vec<String> = lines
        .next()
        .ok_or_else(|| env_error(path, "no column names"))?
        .split('\t')
        .map(|c| c.trim().to_string())
        .collect();
    let time_idx = columns
        .iter()
        .position(|c| c == TIME_COLUMN)
        .ok_or_else(|| env_error(path, "no Time column"))?;

    let mut records = Vec::new();
    let mut current: Option<(NaiveDateTime, NaiveTime)> = None;
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let values: Vec<Option<String>> = line
            .split('\t')
            .map(|v| {
                let v = v.trim();
                (!v.is_empty() && !MISSING_VALUES.contains(&v)).then(|| v.to_string())
            })
            .collect();
        let Some(time_str) = values.get(time_idx).cloned().flatten() else {
            continue;
        };
        let tod = NaiveTime::parse_from_str(&time_str, TIME_FORMAT)
            .map_err(|e| env_error(path, &format!("bad time {time_str:?} ({e})")))?;

        let time = match current {
            None => date.and_time(tod),
            Some((prev, prev_tod)) => {
                let mut step = tod - prev_tod;
                if step < Duration::zero() {
                    step += Duration::days(1);
                }
                prev + step
            }
        };
        current = Some((time, tod));

        let mut values = values;
        values.resize(columns.len(), None);
        records.push(EnvironmentRecord { time, values });
    }

    debug!(file = %path.display(), rows = records.len(), "read environmental data");
    Ok(EnvironmentTable { columns, records })
}

/// Read and concatenate every `ISIIS*.txt` file of `dir`, sorted by time.
/// Unreadable files are logged and skipped.
pub fn load_environment(dir: &Path) -> Result<EnvironmentTable> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("ISIIS") && n.ends_with(".txt"))
        })
        .collect();
    files.sort();

    let mut table = EnvironmentTable::default();
    for file in files {
        match read_environ(&file) {
            Ok(t) => table.extend(t),
            Err(e) => warn!(file = %file.display(), error = %e, "skipping environmental file"),
        }
    }
    table.records.sort_by_key(|r| r.time);
    Ok(table)
}

fn env_error(path: &Path, msg: &str) -> ApeepError {
    ApeepError::Environment(format!("{}: {msg}", path.display()))
}
