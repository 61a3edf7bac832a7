use chrono::NaiveDate;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Row of `cademycode_students` as read from the dev store, untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStudent {
    pub uuid: Value,
    pub name: Value,
    pub dob: Value,
    pub sex: Value,
    pub contact_info: Value,
    pub job_id: Value,
    pub num_course_taken: Value,
    pub current_career_path_id: Value,
    pub time_spent_hrs: Value,
}

/// Row of `cademycode_courses`, untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCareer {
    pub career_path_id: Value,
    pub career_path_name: Value,
    pub hours_to_complete: Value,
}

/// Row of `cademycode_student_jobs`, untyped.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJob {
    pub job_id: Value,
    pub job_category: Value,
    pub avg_salary: Value,
}

/// Embedded `contact_info` blob once parsed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContactBlob {
    pub mailing_address: String,
    pub email: String,
}

/// Cleaned student, still carrying its parsed contact blob.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanStudent {
    pub student: Student,
    pub contact: ContactBlob,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub dob: NaiveDate,
    pub sex: String,
    pub job_id: Option<i64>,
    pub num_course_taken: f64,
    pub current_career_path_id: Option<i64>,
    pub time_spent_hrs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactInfo {
    pub id: i64,
    pub email: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CareerPath {
    pub id: i64,
    pub career_path_name: Option<String>,
    pub hours_to_complete: Option<i64>,
}

/// Compared whole-row for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct JobRecord {
    pub id: i64,
    pub job_category: Option<String>,
    pub avg_salary: Option<i64>,
}

/// One denormalized row of the analytics export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRow {
    pub id: i64,
    pub name: String,
    pub sex: String,
    pub dob: NaiveDate,
    pub num_course_taken: f64,
    pub career_path_name: Option<String>,
    pub hours_to_complete: Option<i64>,
    pub time_spent_hrs: Option<f64>,
    pub prcnt_complete: Option<f64>,
    pub job_category: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
}

/// New rows pulled from the dev store in one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub students: Vec<RawStudent>,
    pub careers: Vec<RawCareer>,
    pub jobs: Vec<RawJob>,
}

/// Typed batches ready for the build store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batches {
    pub students: Vec<Student>,
    pub contact_info: Vec<ContactInfo>,
    pub careers: Vec<CareerPath>,
    pub jobs: Vec<JobRecord>,
}

impl Batches {
    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
            && self.contact_info.is_empty()
            && self.careers.is_empty()
            && self.jobs.is_empty()
    }
}
