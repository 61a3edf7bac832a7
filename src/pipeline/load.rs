use crate::db::{self, StoreMode};
use crate::error::Result;
use crate::pipeline::export::{self, ExportOutcome};
use crate::pipeline::transform::ensure_row_count;
use crate::types::{AnalyticsRow, Batches, CareerPath, ContactInfo, JobRecord, Student};
use metrics::counter;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

const BUILD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id                     INTEGER,
    name                   TEXT,
    dob                    TEXT,
    sex                    TEXT,
    job_id                 INTEGER,
    num_course_taken       REAL,
    current_career_path_id INTEGER,
    time_spent_hrs         REAL
);
CREATE TABLE IF NOT EXISTS contact_info (
    id      INTEGER,
    email   TEXT,
    address TEXT,
    city    TEXT,
    state   TEXT,
    zip     TEXT
);
CREATE TABLE IF NOT EXISTS careers (
    id                INTEGER,
    career_path_name  TEXT,
    hours_to_complete INTEGER
);
CREATE TABLE IF NOT EXISTS jobs (
    id           INTEGER,
    job_category TEXT,
    avg_salary   INTEGER
);
"#;

/// What one load appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows_added: Vec<(&'static str, usize)>,
    pub export: Option<ExportOutcome>,
}

/// Left-join index over a reference table; keys may map to several rows.
fn index_by<T, F>(rows: &[T], key: F) -> HashMap<i64, Vec<&T>>
where
    F: Fn(&T) -> i64,
{
    let mut index: HashMap<i64, Vec<&T>> = HashMap::with_capacity(rows.len());
    for row in rows {
        index.entry(key(row)).or_default().push(row);
    }
    index
}

/// Row count a left join of `keys` against `index` would produce.
fn left_join_rows<T>(keys: impl Iterator<Item = Option<i64>>, index: &HashMap<i64, Vec<&T>>) -> usize {
    keys.map(|k| k.and_then(|k| index.get(&k)).map_or(1, |m| m.len().max(1))).sum()
}

fn single<'a, T>(key: Option<i64>, index: &HashMap<i64, Vec<&'a T>>) -> Option<&'a T> {
    key.and_then(|k| index.get(&k)).and_then(|m| m.first().copied())
}

/// Joins the new students to careers, jobs and contact_info.
///
/// Every student must match at most one row per reference table; anything else
/// changes the row count and fails with [`crate::error::EtlError::RowCount`].
pub fn build_analytics(
    students: &[Student],
    contact_info: &[ContactInfo],
    careers: &[CareerPath],
    jobs: &[JobRecord],
) -> Result<Vec<AnalyticsRow>> {
    let expected = students.len();
    let careers = index_by(careers, |c| c.id);
    let jobs = index_by(jobs, |j| j.id);
    let contacts = index_by(contact_info, |c| c.id);

    ensure_row_count(
        "analytics join (careers)",
        expected,
        left_join_rows(students.iter().map(|s| s.current_career_path_id), &careers),
    )?;
    ensure_row_count(
        "analytics join (jobs)",
        expected,
        left_join_rows(students.iter().map(|s| s.job_id), &jobs),
    )?;
    ensure_row_count(
        "analytics join (contact_info)",
        expected,
        left_join_rows(students.iter().map(|s| Some(s.id)), &contacts),
    )?;

    let mut rows: Vec<AnalyticsRow> = students
        .iter()
        .map(|s| {
            let career = single(s.current_career_path_id, &careers);
            let job = single(s.job_id, &jobs);
            let contact = single(Some(s.id), &contacts);
            let hours_to_complete = career.and_then(|c| c.hours_to_complete);
            let prcnt_complete = match (s.time_spent_hrs, hours_to_complete) {
                (Some(spent), Some(hours)) if hours != 0 => Some(spent / hours as f64),
                _ => None,
            };
            AnalyticsRow {
                id: s.id,
                name: s.name.clone(),
                sex: s.sex.clone(),
                dob: s.dob,
                num_course_taken: s.num_course_taken,
                career_path_name: career.and_then(|c| c.career_path_name.clone()),
                hours_to_complete,
                time_spent_hrs: s.time_spent_hrs,
                prcnt_complete,
                job_category: job.and_then(|j| j.job_category.clone()),
                city: contact.map(|c| c.city.clone()),
                state: contact.map(|c| c.state.clone()),
            }
        })
        .collect();
    rows.sort_by_key(|r| r.id);
    Ok(rows)
}

fn read_careers(conn: &Connection) -> Result<Vec<CareerPath>> {
    let mut stmt = conn.prepare("SELECT id, career_path_name, hours_to_complete FROM careers")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CareerPath { id: row.get(0)?, career_path_name: row.get(1)?, hours_to_complete: row.get(2)? })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn read_jobs(conn: &Connection) -> Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare("SELECT id, job_category, avg_salary FROM jobs")?;
    let rows = stmt
        .query_map([], |row| Ok(JobRecord { id: row.get(0)?, job_category: row.get(1)?, avg_salary: row.get(2)? }))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn append_students(conn: &mut Connection, rows: &[Student]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO students (id, name, dob, sex, job_id, num_course_taken, current_career_path_id, time_spent_hrs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for s in rows {
            stmt.execute(params![
                s.id,
                s.name,
                s.dob.format("%Y-%m-%d").to_string(),
                s.sex,
                s.job_id,
                s.num_course_taken,
                s.current_career_path_id,
                s.time_spent_hrs
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

fn append_contact_info(conn: &mut Connection, rows: &[ContactInfo]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO contact_info (id, email, address, city, state, zip) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for c in rows {
            stmt.execute(params![c.id, c.email, c.address, c.city, c.state, c.zip])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

fn append_careers(conn: &mut Connection, rows: &[CareerPath]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO careers (id, career_path_name, hours_to_complete) VALUES (?1, ?2, ?3)")?;
        for c in rows {
            stmt.execute(params![c.id, c.career_path_name, c.hours_to_complete])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

fn append_jobs(conn: &mut Connection, rows: &[JobRecord]) -> Result<usize> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare("INSERT INTO jobs (id, job_category, avg_salary) VALUES (?1, ?2, ?3)")?;
        for j in rows {
            stmt.execute(params![j.id, j.job_category, j.avg_salary])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

fn record_added(report: &mut LoadReport, table: &'static str, added: usize) {
    info!("{}: {} rows added", table, added);
    counter!("etl_rows_loaded_total", "table" => table).increment(added as u64);
    report.rows_added.push((table, added));
}

/// Appends the batches to the build store and the new students to the analytics export.
///
/// The analytics view is validated before anything is written, so a join-integrity
/// failure leaves both the store and the export untouched.
pub fn load(build_db: &Path, analytics_csv: &Path, batches: &Batches) -> Result<LoadReport> {
    info!("Loading data...");
    let stored = db::with_connection(build_db, StoreMode::ReadWrite, |conn| {
        conn.execute_batch(BUILD_SCHEMA)?;

        let analytics = if batches.students.is_empty() {
            None
        } else {
            // Earlier runs may already hold the career/job a new student points to
            let mut careers = read_careers(conn)?;
            careers.extend(batches.careers.iter().cloned());
            let mut jobs = read_jobs(conn)?;
            jobs.extend(batches.jobs.iter().cloned());
            debug!(careers = careers.len(), jobs = jobs.len(), "Reference tables for the analytics join");
            Some(build_analytics(&batches.students, &batches.contact_info, &careers, &jobs)?)
        };

        let mut report = LoadReport::default();
        if !batches.students.is_empty() {
            let added = append_students(conn, &batches.students)?;
            record_added(&mut report, "students", added);
        }
        if !batches.contact_info.is_empty() {
            let added = append_contact_info(conn, &batches.contact_info)?;
            record_added(&mut report, "contact_info", added);
        }
        if !batches.careers.is_empty() {
            let added = append_careers(conn, &batches.careers)?;
            record_added(&mut report, "careers", added);
        }
        if !batches.jobs.is_empty() {
            let added = append_jobs(conn, &batches.jobs)?;
            record_added(&mut report, "jobs", added);
        }
        Ok((report, analytics))
    })?;

    let Some((mut report, analytics)) = stored else {
        warn!("Build database load did not complete; analytics export skipped");
        return Ok(LoadReport::default());
    };

    match analytics {
        Some(rows) => {
            let outcome = export::append_analytics(analytics_csv, &rows)?;
            info!("{} rows added to analytics_csv", outcome.rows_written);
            counter!("etl_analytics_rows_total").increment(outcome.rows_written as u64);
            report.export = Some(outcome);
        }
        None => info!("No new rows loaded to the analytics csv."),
    }
    Ok(report)
}
