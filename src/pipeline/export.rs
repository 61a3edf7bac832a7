use crate::error::Result;
use crate::types::AnalyticsRow;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub const ANALYTICS_COLUMNS: [&str; 12] = [
    "id",
    "name",
    "sex",
    "dob",
    "num_course_taken",
    "career_path_name",
    "hours_to_complete",
    "time_spent_hrs",
    "prcnt_complete",
    "job_category",
    "city",
    "state",
];

/// Result of one append to the analytics CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOutcome {
    pub rows_written: usize,
    pub header_written: bool,
}

/// Escape a string for CSV output
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Whole floats keep one decimal (`6.0`) so numeric columns read back as floats.
fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

fn opt<T, F: Fn(&T) -> String>(value: &Option<T>, f: F) -> String {
    value.as_ref().map(f).unwrap_or_default()
}

pub fn format_row(row: &AnalyticsRow) -> String {
    let fields = [
        row.id.to_string(),
        escape_csv(&row.name),
        escape_csv(&row.sex),
        row.dob.format("%Y-%m-%d").to_string(),
        format_float(row.num_course_taken),
        opt(&row.career_path_name, |s| escape_csv(s)),
        opt(&row.hours_to_complete, |h| h.to_string()),
        opt(&row.time_spent_hrs, |f| format_float(*f)),
        opt(&row.prcnt_complete, |f| format_float(*f)),
        opt(&row.job_category, |s| escape_csv(s)),
        opt(&row.city, |s| escape_csv(s)),
        opt(&row.state, |s| escape_csv(s)),
    ];
    fields.join(",")
}

/// Appends `rows` to the export at `path`, writing the header only when the file is
/// new or empty. The whole run goes out in a single write.
pub fn append_analytics(path: &Path, rows: &[AnalyticsRow]) -> Result<ExportOutcome> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let header_written = file.metadata()?.len() == 0;
    if header_written {
        info!("analytics_csv created: {}", path.display());
    } else {
        debug!("analytics_csv exists: {}", path.display());
    }

    let mut buf = String::new();
    if header_written {
        buf.push_str(&ANALYTICS_COLUMNS.join(","));
        buf.push('\n');
    }
    for row in rows {
        buf.push_str(&format_row(row));
        buf.push('\n');
    }
    file.write_all(buf.as_bytes())?;
    file.flush()?;

    Ok(ExportOutcome { rows_written: rows.len(), header_written })
}

/// Number of non-blank CSV records in `path`, header included. Newlines inside
/// quoted fields do not start a new record.
pub fn count_records(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path)?;
    let mut records = 0u64;
    let mut in_quotes = false;
    let mut record_has_content = false;
    for c in content.chars() {
        match c {
            '"' => {
                // An escaped "" toggles twice and leaves the state unchanged
                in_quotes = !in_quotes;
                record_has_content = true;
            }
            '\n' | '\r' if !in_quotes => {
                if record_has_content {
                    records += 1;
                }
                record_has_content = false;
            }
            c if !c.is_whitespace() || in_quotes => record_has_content = true,
            _ => {}
        }
    }
    if record_has_content {
        records += 1;
    }
    Ok(records)
}
