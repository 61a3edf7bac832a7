use cademycode_etl::{logging, ContactPolicy, EtlConfig, Pipeline};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cademycode_etl")]
#[command(about = "Incremental ETL from the Cademycode dev database to the build database and analytics CSV")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct PathArgs {
    /// TOML config file (defaults to ./etl.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Dev (source) SQLite database
    #[arg(long, global = true)]
    dev_db: Option<PathBuf>,
    /// Build (destination) SQLite database
    #[arg(long, global = true)]
    build_db: Option<PathBuf>,
    /// Analytics CSV export
    #[arg(long, global = true)]
    analytics_csv: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract new dev rows, transform them and append them to the build outputs (default)
    Run {
        /// abort_batch or reject_record
        #[arg(long)]
        contact_policy: Option<ContactPolicy>,
    },
    /// Show row counts of the build database and analytics export
    Status,
}

fn resolve_config(paths: &PathArgs) -> anyhow::Result<EtlConfig> {
    let mut config = EtlConfig::load(paths.config.as_deref())?;
    if let Some(p) = &paths.dev_db {
        config.dev_db = p.clone();
    }
    if let Some(p) = &paths.build_db {
        config.build_db = p.clone();
    }
    if let Some(p) = &paths.analytics_csv {
        config.analytics_csv = p.clone();
    }
    Ok(config)
}

fn run(mut config: EtlConfig, contact_policy: Option<ContactPolicy>) -> anyhow::Result<bool> {
    if let Some(policy) = contact_policy {
        config.contact_policy = policy;
    }
    let (_guard, log_path) = logging::init_logging(&config.logging)?;
    info!("Logging this run to {}", log_path.display());

    let pipeline = Pipeline::new(&config);
    match pipeline.run() {
        Ok(result) => {
            if result.bootstrap {
                info!("Bootstrap run: build database created");
            }
            if !result.rejected_students.is_empty() {
                error!(
                    "{} students rejected for malformed contact_info: {:?}",
                    result.rejected_students.len(),
                    result.rejected_students
                );
            }
            Ok(true)
        }
        Err(e) if e.is_data_error() => {
            error!("ETL run aborted on corrupt batch data, nothing exported: {}", e);
            Ok(false)
        }
        Err(e) => {
            error!("ETL run failed: {}", e);
            Ok(false)
        }
    }
}

fn status(config: &EtlConfig) -> anyhow::Result<()> {
    let status = Pipeline::new(config).status()?;
    if !status.build_exists {
        println!("Build database {} does not exist yet", config.build_db.display());
    }
    for (table, rows) in &status.tables {
        match rows {
            Some(n) => println!("{table:<14} {n}"),
            None => println!("{table:<14} (missing)"),
        }
    }
    match status.analytics_rows {
        Some(n) => println!("{:<14} {n}", "analytics_csv"),
        None => println!("{:<14} (missing)", "analytics_csv"),
    }
    Ok(())
}

fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let config = resolve_config(&cli.paths)?;

    match cli.command.unwrap_or(Commands::Run { contact_policy: None }) {
        Commands::Run { contact_policy } => {
            if run(config, contact_policy)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Status => {
            status(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
