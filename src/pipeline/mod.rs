// Incremental ETL: extract new dev rows, transform, append to the build store and export

pub mod export;
pub mod extract;
pub mod load;
pub mod transform;

use crate::config::{ContactPolicy, EtlConfig};
use crate::db::{self, StoreMode};
use crate::error::Result;
use metrics::{counter, histogram};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, instrument};

pub use load::LoadReport;

/// Result of a complete pipeline run
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PipelineResult {
    pub bootstrap: bool,
    pub extracted_students: usize,
    pub extracted_careers: usize,
    pub extracted_jobs: usize,
    pub rejected_students: Vec<i64>,
    pub rows_added: Vec<(&'static str, usize)>,
    pub analytics_rows: usize,
}

/// Row counts currently held by the build store and the analytics export.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BuildStatus {
    pub build_exists: bool,
    pub tables: Vec<(&'static str, Option<u64>)>,
    pub analytics_rows: Option<u64>,
}

pub const BUILD_TABLES: [&str; 4] = ["students", "contact_info", "careers", "jobs"];

/// Extract → Transform → Load over fixed dev/build/export locations.
///
/// Runs are strictly sequential and not safe to overlap against the same build
/// store; callers must ensure a single instance at a time.
#[derive(Debug, Clone)]
pub struct Pipeline {
    dev_db: PathBuf,
    build_db: PathBuf,
    analytics_csv: PathBuf,
    contact_policy: ContactPolicy,
}

impl Pipeline {
    pub fn new(config: &EtlConfig) -> Self {
        Self {
            dev_db: config.dev_db.clone(),
            build_db: config.build_db.clone(),
            analytics_csv: config.analytics_csv.clone(),
            contact_policy: config.contact_policy,
        }
    }

    #[instrument(skip(self), fields(build_db = %self.build_db.display()))]
    pub fn run(&self) -> Result<PipelineResult> {
        let started = std::time::Instant::now();
        counter!("etl_pipeline_runs_total").increment(1);

        let outcome = self.run_phases();

        histogram!("etl_pipeline_duration_seconds").record(started.elapsed().as_secs_f64());
        if let Err(e) = &outcome {
            counter!("etl_pipeline_errors_total").increment(1);
            error!("Pipeline run aborted: {}", e);
        }
        outcome
    }

    fn run_phases(&self) -> Result<PipelineResult> {
        let bootstrap = !self.build_db.exists();

        info!("Extracting data...");
        let extracted = extract::extract(&self.dev_db, &self.build_db)?;
        let mut result = PipelineResult {
            bootstrap,
            extracted_students: extracted.students.len(),
            extracted_careers: extracted.careers.len(),
            extracted_jobs: extracted.jobs.len(),
            ..Default::default()
        };

        let transformed = transform::transform(extracted, self.contact_policy)?;
        result.rejected_students = transformed.rejected_students;
        if transformed.batches.is_empty() {
            info!("No new rows to load");
        }

        let report = load::load(&self.build_db, &self.analytics_csv, &transformed.batches)?;
        result.rows_added = report.rows_added;
        result.analytics_rows = report.export.map_or(0, |e| e.rows_written);

        info!(
            students = result.extracted_students,
            analytics_rows = result.analytics_rows,
            "Pipeline finished"
        );
        Ok(result)
    }

    /// Reads row counts without modifying anything.
    pub fn status(&self) -> Result<BuildStatus> {
        let mut status = BuildStatus { build_exists: self.build_db.exists(), ..Default::default() };

        if status.build_exists {
            let tables = db::with_connection(&self.build_db, StoreMode::ReadOnly, |conn| {
                let conn = &*conn;
                BUILD_TABLES
                    .iter()
                    .map(|&table| Ok((table, db::count_rows(conn, table)?)))
                    .collect::<Result<Vec<_>>>()
            })?;
            status.tables = tables.unwrap_or_default();
        }

        if self.analytics_csv.exists() {
            status.analytics_rows = Some(export::count_records(&self.analytics_csv)?.saturating_sub(1));
        }
        Ok(status)
    }
}
