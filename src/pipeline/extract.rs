use crate::db::{self, StoreMode};
use crate::error::Result;
use crate::types::{Extracted, RawCareer, RawJob, RawStudent};
use metrics::counter;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEV_STUDENTS: &str = "cademycode_students";
pub const DEV_CAREERS: &str = "cademycode_courses";
pub const DEV_JOBS: &str = "cademycode_student_jobs";

/// A dev table paired with its build-store counterpart.
#[derive(Debug, Clone, Copy)]
struct SourceTable {
    dev_table: &'static str,
    dev_id: &'static str,
    build_table: &'static str,
}

const STUDENTS: SourceTable = SourceTable { dev_table: DEV_STUDENTS, dev_id: "uuid", build_table: "students" };
const CAREERS: SourceTable = SourceTable { dev_table: DEV_CAREERS, dev_id: "career_path_id", build_table: "careers" };
const JOBS: SourceTable = SourceTable { dev_table: DEV_JOBS, dev_id: "job_id", build_table: "jobs" };

/// Ids already materialized in the build store, per table.
#[derive(Debug, Default)]
struct ExistingIds {
    students: BTreeSet<i64>,
    careers: BTreeSet<i64>,
    jobs: BTreeSet<i64>,
}

/// `WHERE` clause excluding `ids`; empty when there is nothing to exclude.
fn exclusion_clause(column: &str, ids: &BTreeSet<i64>) -> String {
    if ids.is_empty() {
        return String::new();
    }
    let list = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
    format!(" WHERE {column} NOT IN ({list})")
}

fn select_new(table: SourceTable, columns: &str, existing: &BTreeSet<i64>) -> String {
    format!(
        "SELECT {columns} FROM {}{};",
        table.dev_table,
        exclusion_clause(table.dev_id, existing)
    )
}

fn read_students(conn: &Connection, existing: &BTreeSet<i64>) -> Result<Vec<RawStudent>> {
    let sql = select_new(
        STUDENTS,
        "uuid, name, dob, sex, contact_info, job_id, num_course_taken, current_career_path_id, time_spent_hrs",
        existing,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawStudent {
                uuid: row.get(0)?,
                name: row.get(1)?,
                dob: row.get(2)?,
                sex: row.get(3)?,
                contact_info: row.get(4)?,
                job_id: row.get(5)?,
                num_course_taken: row.get(6)?,
                current_career_path_id: row.get(7)?,
                time_spent_hrs: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn read_careers(conn: &Connection, existing: &BTreeSet<i64>) -> Result<Vec<RawCareer>> {
    let sql = select_new(CAREERS, "career_path_id, career_path_name, hours_to_complete", existing);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawCareer {
                career_path_id: row.get(0)?,
                career_path_name: row.get(1)?,
                hours_to_complete: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn read_jobs(conn: &Connection, existing: &BTreeSet<i64>) -> Result<Vec<RawJob>> {
    let sql = select_new(JOBS, "job_id, job_category, avg_salary", existing);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RawJob {
                job_id: row.get(0)?,
                job_category: row.get(1)?,
                avg_salary: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn read_existing_ids(build_db: &Path) -> Result<Option<ExistingIds>> {
    db::with_connection(build_db, StoreMode::ReadOnly, |conn| {
        Ok(ExistingIds {
            students: db::read_ids(conn, STUDENTS.build_table, "id")?,
            careers: db::read_ids(conn, CAREERS.build_table, "id")?,
            jobs: db::read_ids(conn, JOBS.build_table, "id")?,
        })
    })
}

fn log_table_status(table: &str, rows: usize) {
    info!("{}: {} new rows", table, rows);
    counter!("etl_rows_extracted_total", "table" => table.to_string()).increment(rows as u64);
}

/// Reads the dev rows that the build store does not hold yet.
///
/// Returns empty batches whenever either store cannot be read.
pub fn extract(dev_db: &Path, build_db: &Path) -> Result<Extracted> {
    let existing = if build_db.exists() {
        debug!("Build database exists. Checking for new data");
        match read_existing_ids(build_db)? {
            Some(ids) => {
                debug!(
                    students = ids.students.len(),
                    careers = ids.careers.len(),
                    jobs = ids.jobs.len(),
                    "Read existing ids from the build database"
                );
                ids
            }
            None => {
                // Reading everything here would double-append on the next load
                warn!("Could not read existing ids from {}; extracting nothing", build_db.display());
                return Ok(Extracted::default());
            }
        }
    } else {
        debug!("Build database does not exist. Getting all data from dev");
        ExistingIds::default()
    };

    for (table, ids) in [
        (STUDENTS, &existing.students),
        (CAREERS, &existing.careers),
        (JOBS, &existing.jobs),
    ] {
        if ids.is_empty() {
            debug!("{}: no existing ids, reading the full table", table.build_table);
        }
    }

    let extracted = db::with_connection(dev_db, StoreMode::ReadOnly, |conn| {
        debug!("Extracting new data from the dev database");
        Ok(Extracted {
            students: read_students(conn, &existing.students)?,
            careers: read_careers(conn, &existing.careers)?,
            jobs: read_jobs(conn, &existing.jobs)?,
        })
    })?
    .unwrap_or_else(|| {
        warn!("Could not read the dev database at {}; extracting nothing", dev_db.display());
        Extracted::default()
    });

    log_table_status(DEV_STUDENTS, extracted.students.len());
    log_table_status(DEV_CAREERS, extracted.careers.len());
    log_table_status(DEV_JOBS, extracted.jobs.len());

    Ok(extracted)
}
