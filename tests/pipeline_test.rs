use anyhow::Result;
use cademycode_etl::{ContactPolicy, EtlConfig, EtlError, Pipeline};
use rusqlite::{params, Connection};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const ADDRESS: &str = "123 Main St, Springfield, IL, 62704";

fn config_in(dir: &TempDir) -> EtlConfig {
    EtlConfig {
        dev_db: dir.path().join("dev").join("cademycode.db"),
        build_db: dir.path().join("build").join("cademycode_build.db"),
        analytics_csv: dir.path().join("build").join("cademycode_build.csv"),
        ..EtlConfig::default()
    }
}

fn create_dev(path: &Path) -> Result<Connection> {
    fs::create_dir_all(path.parent().unwrap())?;
    let conn = Connection::open(path)?;
    conn.execute_batch(
        r#"
        CREATE TABLE cademycode_students (
            uuid INTEGER, name TEXT, dob TEXT, sex TEXT, contact_info TEXT,
            job_id TEXT, num_course_taken TEXT, current_career_path_id TEXT, time_spent_hrs TEXT
        );
        CREATE TABLE cademycode_courses (career_path_id INTEGER, career_path_name TEXT, hours_to_complete INTEGER);
        CREATE TABLE cademycode_student_jobs (job_id INTEGER, job_category TEXT, avg_salary INTEGER);
        INSERT INTO cademycode_courses VALUES (1, 'data scientist', 20), (2, 'backend engineer', 25);
        INSERT INTO cademycode_student_jobs VALUES (1, 'analytics', 86000), (2, 'engineer', 101000), (2, 'engineer', 101000);
        "#,
    )?;
    Ok(conn)
}

fn add_student(conn: &Connection, id: i64, address: &str, job: Option<&str>, career: Option<&str>) -> Result<()> {
    let contact = serde_json::json!({ "mailing_address": address, "email": format!("s{id}@example.com") });
    conn.execute(
        "INSERT INTO cademycode_students VALUES (?1, ?2, '1990-05-17', 'F', ?3, ?4, '2.0', ?5, '10.0')",
        params![id, format!("Student {id}"), contact.to_string(), job, career],
    )?;
    Ok(())
}

fn build_count(config: &EtlConfig, table: &str) -> Result<i64> {
    let conn = Connection::open(&config.build_db)?;
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
}

fn csv_lines(config: &EtlConfig) -> Result<Vec<String>> {
    Ok(fs::read_to_string(&config.analytics_csv)?.lines().map(str::to_string).collect())
}

#[test]
fn bootstrap_then_rerun_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let dev = create_dev(&config.dev_db)?;
    add_student(&dev, 1, ADDRESS, Some("1.0"), Some("1.0"))?;
    add_student(&dev, 2, ADDRESS, None, None)?;
    add_student(&dev, 3, ADDRESS, Some("2.0"), Some("2.0"))?;

    let pipeline = Pipeline::new(&config);
    let first = pipeline.run()?;
    assert!(first.bootstrap);
    assert_eq!(first.extracted_students, 3);
    assert_eq!(first.analytics_rows, 3);
    assert_eq!(build_count(&config, "students")?, 3);
    assert_eq!(build_count(&config, "contact_info")?, 3);
    assert_eq!(build_count(&config, "careers")?, 2);
    // duplicate job row dropped
    assert_eq!(build_count(&config, "jobs")?, 2);

    let second = pipeline.run()?;
    assert!(!second.bootstrap);
    assert_eq!(second.extracted_students, 0);
    assert_eq!(second.extracted_careers, 0);
    assert_eq!(second.extracted_jobs, 0);
    assert!(second.rows_added.is_empty());
    assert_eq!(second.analytics_rows, 0);
    assert_eq!(build_count(&config, "students")?, 3);
    assert_eq!(build_count(&config, "jobs")?, 2);
    assert_eq!(csv_lines(&config)?.len(), 4);
    Ok(())
}

#[test]
fn incremental_run_appends_only_new_students() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let dev = create_dev(&config.dev_db)?;
    add_student(&dev, 1, ADDRESS, Some("1"), Some("1"))?;
    let pipeline = Pipeline::new(&config);
    pipeline.run()?;

    add_student(&dev, 2, ADDRESS, Some("2"), Some("2"))?;
    let result = pipeline.run()?;
    assert_eq!(result.extracted_students, 1);
    assert_eq!(result.rows_added, vec![("students", 1), ("contact_info", 1)]);

    let ids: Vec<i64> = Connection::open(&config.build_db)?
        .prepare("SELECT id FROM students ORDER BY id")?
        .query_map([], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    assert_eq!(ids, vec![1, 2]);

    // career 2 and job 2 were loaded in the first run and still resolve
    let lines = csv_lines(&config)?;
    assert_eq!(lines.len(), 3);
    assert_eq!(lines.iter().filter(|l| l.starts_with("id,")).count(), 1);
    assert_eq!(lines[2], "2,Student 2,F,1990-05-17,2.0,backend engineer,25,10.0,0.4,engineer,Springfield,IL");
    Ok(())
}

#[test]
fn absent_keys_export_as_empty_fields() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let dev = create_dev(&config.dev_db)?;
    add_student(&dev, 7, ADDRESS, None, None)?;
    Pipeline::new(&config).run()?;

    let (job, career): (Option<i64>, Option<i64>) = Connection::open(&config.build_db)?.query_row(
        "SELECT job_id, current_career_path_id FROM students WHERE id = 7",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!((job, career), (None, None));
    assert_eq!(csv_lines(&config)?[1], "7,Student 7,F,1990-05-17,2.0,,,10.0,,,Springfield,IL");
    Ok(())
}

#[test]
fn malformed_address_aborts_without_writing() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let dev = create_dev(&config.dev_db)?;
    add_student(&dev, 1, ADDRESS, None, None)?;
    add_student(&dev, 2, "nowhere in particular", None, None)?;

    let err = Pipeline::new(&config).run().unwrap_err();
    assert!(matches!(err, EtlError::MalformedAddress { id: 2, parts: 1, .. }));
    assert!(!config.build_db.exists());
    assert!(!config.analytics_csv.exists());
    Ok(())
}

#[test]
fn rejected_records_are_retried_next_run() -> Result<()> {
    let dir = tempdir()?;
    let config = EtlConfig { contact_policy: ContactPolicy::RejectRecord, ..config_in(&dir) };
    let dev = create_dev(&config.dev_db)?;
    add_student(&dev, 1, ADDRESS, None, None)?;
    add_student(&dev, 2, "nowhere in particular", None, None)?;

    let pipeline = Pipeline::new(&config);
    let result = pipeline.run()?;
    assert_eq!(result.rejected_students, vec![2]);
    assert_eq!(build_count(&config, "students")?, 1);

    dev.execute(
        "UPDATE cademycode_students SET contact_info = ?1 WHERE uuid = 2",
        params![serde_json::json!({ "mailing_address": ADDRESS, "email": "fixed@example.com" }).to_string()],
    )?;
    let result = pipeline.run()?;
    assert!(result.rejected_students.is_empty());
    assert_eq!(result.extracted_students, 1);
    assert_eq!(build_count(&config, "students")?, 2);
    Ok(())
}

#[test]
fn missing_dev_store_degrades_to_no_data() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);

    let result = Pipeline::new(&config).run()?;
    assert_eq!(result.extracted_students, 0);
    assert_eq!(result.analytics_rows, 0);
    assert!(!config.dev_db.exists());
    assert!(!config.analytics_csv.exists());
    Ok(())
}

#[test]
fn status_reports_counts() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let pipeline = Pipeline::new(&config);
    let before = pipeline.status()?;
    assert!(!before.build_exists);
    assert_eq!(before.analytics_rows, None);

    let dev = create_dev(&config.dev_db)?;
    add_student(&dev, 1, ADDRESS, Some("1"), Some("1"))?;
    add_student(&dev, 2, ADDRESS, Some("1"), Some("1"))?;
    pipeline.run()?;

    let after = pipeline.status()?;
    assert!(after.build_exists);
    assert_eq!(
        after.tables,
        vec![("students", Some(2)), ("contact_info", Some(2)), ("careers", Some(2)), ("jobs", Some(2))]
    );
    assert_eq!(after.analytics_rows, Some(2));
    Ok(())
}

#[test]
fn mistyped_reference_row_aborts_instead_of_looking_empty() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let dev = create_dev(&config.dev_db)?;
    dev.execute_batch(
        "DROP TABLE cademycode_courses;
         CREATE TABLE cademycode_courses (career_path_id INTEGER, career_path_name TEXT, hours_to_complete REAL);
         INSERT INTO cademycode_courses VALUES (1, 'data scientist', 20.5);",
    )?;
    add_student(&dev, 1, ADDRESS, None, Some("1"))?;

    let err = Pipeline::new(&config).run().unwrap_err();
    assert!(err.is_data_error());
    assert!(matches!(err, EtlError::InvalidValue { column: "hours_to_complete", id: 1, .. }));
    assert!(!config.build_db.exists());
    assert!(!config.analytics_csv.exists());
    Ok(())
}

#[test]
fn whole_real_reference_values_are_accepted() -> Result<()> {
    let dir = tempdir()?;
    let config = config_in(&dir);
    let dev = create_dev(&config.dev_db)?;
    dev.execute_batch(
        "DROP TABLE cademycode_courses;
         CREATE TABLE cademycode_courses (career_path_id REAL, career_path_name TEXT, hours_to_complete REAL);
         INSERT INTO cademycode_courses VALUES (1.0, 'data scientist', 20.0);",
    )?;
    add_student(&dev, 1, ADDRESS, None, Some("1"))?;

    let result = Pipeline::new(&config).run()?;
    assert_eq!(result.extracted_careers, 1);
    assert_eq!(result.analytics_rows, 1);
    assert!(csv_lines(&config)?[1].contains("data scientist,20,10.0,0.5"));
    Ok(())
}
