use crate::config::ContactPolicy;
use crate::error::{EtlError, Result};
use crate::types::{
    Batches, CareerPath, CleanStudent, ContactBlob, ContactInfo, Extracted, JobRecord, RawCareer,
    RawJob, RawStudent, Student,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use metrics::counter;
use rusqlite::types::Value;
use std::collections::HashSet;
use tracing::{debug, error, info};

/// Output of [`transform`]: the typed batches plus any students dropped under
/// [`ContactPolicy::RejectRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transformed {
    pub batches: Batches,
    pub rejected_students: Vec<i64>,
}

/// Fails with [`EtlError::RowCount`] when a reshape step changed the row count.
pub fn ensure_row_count(stage: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        let err = EtlError::RowCount { stage: stage.to_string(), expected, actual };
        error!("{}", err);
        return Err(err);
    }
    Ok(())
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => format!("'{s}'"),
        Value::Blob(b) => format!("<{} byte blob>", b.len()),
    }
}

fn invalid(column: &'static str, id: i64, value: &Value) -> EtlError {
    EtlError::InvalidValue { column, id, value: render(value) }
}

fn to_f64(column: &'static str, id: i64, value: &Value) -> Result<Option<f64>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(*i as f64)),
        Value::Real(f) => Ok(Some(*f)),
        Value::Text(s) if s.trim().is_empty() => Ok(None),
        Value::Text(s) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_nan() => Ok(None),
            Ok(f) => Ok(Some(f)),
            Err(_) => Err(invalid(column, id, value)),
        },
        Value::Blob(_) => Err(invalid(column, id, value)),
    }
}

/// Nullable integer column. Accepts integral reals and numeric text such as `"7.0"`.
fn to_i64(column: &'static str, id: i64, value: &Value) -> Result<Option<i64>> {
    if let Value::Integer(i) = value {
        return Ok(Some(*i));
    }
    match to_f64(column, id, value)? {
        None => Ok(None),
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
        Some(_) => Err(invalid(column, id, value)),
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
    }
}

fn parse_dob(id: i64, value: &Value) -> Result<NaiveDate> {
    let Value::Text(raw) = value else {
        return Err(invalid("dob", id, value));
    };
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.date_naive()))
        .map_err(|_| invalid("dob", id, value))
}

fn parse_contact(id: i64, value: &Value) -> Result<ContactBlob> {
    let Value::Text(raw) = value else {
        return Err(EtlError::MalformedContact { id, reason: format!("expected JSON text, got {}", render(value)) });
    };
    serde_json::from_str(raw).map_err(|e| EtlError::MalformedContact { id, reason: e.to_string() })
}

/// Types one raw student row and parses its contact blob.
pub fn clean_student(raw: &RawStudent) -> Result<CleanStudent> {
    let id = match &raw.uuid {
        Value::Null => return Err(invalid("uuid", 0, &raw.uuid)),
        other => to_i64("uuid", 0, other)?.ok_or_else(|| invalid("uuid", 0, other))?,
    };

    let student = Student {
        id,
        name: to_text(&raw.name),
        dob: parse_dob(id, &raw.dob)?,
        sex: to_text(&raw.sex),
        job_id: to_i64("job_id", id, &raw.job_id)?,
        num_course_taken: to_f64("num_course_taken", id, &raw.num_course_taken)?.unwrap_or(0.0),
        current_career_path_id: to_i64("current_career_path_id", id, &raw.current_career_path_id)?,
        time_spent_hrs: to_f64("time_spent_hrs", id, &raw.time_spent_hrs)?,
    };
    let contact = parse_contact(id, &raw.contact_info)?;

    Ok(CleanStudent { student, contact })
}

/// Splits `street, city, state, zip` into exactly four trimmed parts.
pub fn split_mailing_address(id: i64, address: &str) -> Result<[String; 4]> {
    let parts: Vec<String> = address.split(',').map(|p| p.trim().to_string()).collect();
    <[String; 4]>::try_from(parts).map_err(|parts| EtlError::MalformedAddress {
        id,
        address: address.to_string(),
        parts: parts.len(),
    })
}

fn is_contact_error(err: &EtlError) -> bool {
    matches!(err, EtlError::MalformedContact { .. } | EtlError::MalformedAddress { .. })
}

/// Applies `policy` to a per-record result. `Ok(None)` means the record was rejected.
fn apply_policy<T>(policy: ContactPolicy, id: i64, result: Result<T>, rejected: &mut Vec<i64>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if policy == ContactPolicy::RejectRecord && is_contact_error(&e) => {
            error!("Rejecting student {}: {}", id, e);
            rejected.push(id);
            Ok(None)
        }
        Err(e) => {
            error!("{}", e);
            Err(e)
        }
    }
}

/// Best-effort id for log lines and rejection lists, before the row is typed.
fn raw_id_hint(raw: &RawStudent) -> i64 {
    to_i64("uuid", 0, &raw.uuid).ok().flatten().unwrap_or(0)
}

pub fn clean_students(input: &[RawStudent], policy: ContactPolicy, rejected: &mut Vec<i64>) -> Result<Vec<CleanStudent>> {
    let before = rejected.len();
    let mut output = Vec::with_capacity(input.len());
    for raw in input {
        if let Some(clean) = apply_policy(policy, raw_id_hint(raw), clean_student(raw), rejected)? {
            output.push(clean);
        }
    }
    ensure_row_count("clean students", input.len() - (rejected.len() - before), output.len())?;
    info!("students table updated.");
    Ok(output)
}

/// Moves the contact blob of every student into a separate contact_info table.
pub fn extract_contact_info(
    input: Vec<CleanStudent>,
    policy: ContactPolicy,
    rejected: &mut Vec<i64>,
) -> Result<(Vec<Student>, Vec<ContactInfo>)> {
    let expected = input.len();
    let before = rejected.len();
    let mut students = Vec::with_capacity(expected);
    let mut contacts = Vec::with_capacity(expected);

    for CleanStudent { student, contact } in input {
        let id = student.id;
        let Some([address, city, state, zip]) =
            apply_policy(policy, id, split_mailing_address(id, &contact.mailing_address), rejected)?
        else {
            continue;
        };
        contacts.push(ContactInfo { id, email: contact.email, address, city, state, zip });
        students.push(student);
    }

    let kept = expected - (rejected.len() - before);
    ensure_row_count("extract contact_info (students)", kept, students.len())?;
    ensure_row_count("extract contact_info", kept, contacts.len())?;
    info!("contact_info table created.");
    Ok((students, contacts))
}

/// Required integer key of a reference row.
fn to_key(column: &'static str, value: &Value) -> Result<i64> {
    to_i64(column, 0, value)?.ok_or_else(|| invalid(column, 0, value))
}

fn to_opt_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(to_text(other)),
    }
}

fn logged<T>(result: Result<T>) -> Result<T> {
    result.map_err(|e| {
        error!("{}", e);
        e
    })
}

/// Drops exact duplicate rows, keeping first occurrences in order.
pub fn dedupe_jobs(input: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = HashSet::with_capacity(input.len());
    let output: Vec<JobRecord> = input.into_iter().filter(|job| seen.insert(job.clone())).collect();
    debug!("jobs deduplicated to {} rows", output.len());
    output
}

fn type_job(raw: &RawJob) -> Result<JobRecord> {
    let id = to_key("job_id", &raw.job_id)?;
    Ok(JobRecord {
        id,
        job_category: to_opt_text(&raw.job_category),
        avg_salary: to_i64("avg_salary", id, &raw.avg_salary)?,
    })
}

/// Types job rows and renames `job_id` to `id`.
pub fn rename_jobs(input: &[RawJob]) -> Result<Vec<JobRecord>> {
    let output = logged(input.iter().map(type_job).collect::<Result<Vec<_>>>())?;
    ensure_row_count("rename jobs", input.len(), output.len())?;
    Ok(output)
}

fn type_career(raw: &RawCareer) -> Result<CareerPath> {
    let id = to_key("career_path_id", &raw.career_path_id)?;
    Ok(CareerPath {
        id,
        career_path_name: to_opt_text(&raw.career_path_name),
        hours_to_complete: to_i64("hours_to_complete", id, &raw.hours_to_complete)?,
    })
}

/// Types career rows and renames `career_path_id` to `id`.
pub fn rename_careers(input: &[RawCareer]) -> Result<Vec<CareerPath>> {
    let output = logged(input.iter().map(type_career).collect::<Result<Vec<_>>>())?;
    ensure_row_count("rename careers", input.len(), output.len())?;
    Ok(output)
}

/// Cleans and reshapes the extracted batches. Empty inputs short-circuit to empty outputs.
pub fn transform(extracted: Extracted, policy: ContactPolicy) -> Result<Transformed> {
    info!("Transforming data...");
    let Extracted { students, careers, jobs } = extracted;
    let mut rejected = Vec::new();
    let mut batches = Batches::default();

    if students.is_empty() {
        debug!("No new students, skipping student transforms");
    } else {
        let clean = clean_students(&students, policy, &mut rejected)?;
        let (students, contact_info) = extract_contact_info(clean, policy, &mut rejected)?;
        batches.students = students;
        batches.contact_info = contact_info;
    }

    if !jobs.is_empty() {
        batches.jobs = dedupe_jobs(rename_jobs(&jobs)?);
    }
    if !careers.is_empty() {
        batches.careers = rename_careers(&careers)?;
    }

    if !rejected.is_empty() {
        counter!("etl_students_rejected_total").increment(rejected.len() as u64);
    }
    Ok(Transformed { batches, rejected_students: rejected })
}
