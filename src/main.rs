use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use athletic_coherence::ingest::{self, RecordKind};
use athletic_coherence::models::{RecordSet, Season};
use athletic_coherence::{db, report, AssessmentConfig, AssessmentResult, LeagueBaselines};

#[derive(Parser)]
#[command(name = "athletic-coherence")]
#[command(about = "Organizational injury pattern, training load and recovery coherence", long_about = None)]
struct Cli {
    /// YAML file merged over the built-in assessment config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Scope {
    #[arg(long)]
    org: String,
    #[arg(long)]
    from: Season,
    #[arg(long)]
    to: Season,
    /// Read records from a JSON file instead of Postgres
    #[arg(long)]
    records: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo organization and league baselines
    Seed,
    /// Import records from a CSV file
    Import {
        #[arg(long, value_enum)]
        kind: RecordKind,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Run an assessment and print or write it as JSON
    Assess {
        #[command(flatten)]
        scope: Scope,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        scope: Scope,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn read_records(path: &Path, season_start_month: u32) -> anyhow::Result<RecordSet> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let records: RecordSet = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    ingest::validate_record_set(&records, season_start_month)
        .with_context(|| format!("rejected {}", path.display()))?;
    Ok(records)
}

async fn run_assessment(scope: &Scope, config: &AssessmentConfig) -> anyhow::Result<AssessmentResult> {
    anyhow::ensure!(
        scope.from <= scope.to,
        "--from {} is after --to {}",
        scope.from,
        scope.to
    );
    let seasons: Vec<Season> = (scope.from..=scope.to).collect();

    let mut baselines: LeagueBaselines = config.league_baselines.clone();
    let records = match &scope.records {
        Some(path) => read_records(path, config.season_start_month)?,
        None => {
            let pool = connect().await?;
            baselines.overlay(db::fetch_baselines(&pool).await?);
            db::fetch_records(
                &pool,
                &scope.org,
                scope.from,
                scope.to,
                config.season_start_month,
            )
            .await?
        }
    };

    let result = athletic_coherence::assess(&scope.org, &seasons, &records, &baselines, config)?;
    Ok(result)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "athletic_coherence=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AssessmentConfig::load(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            let inserted = db::seed(&pool).await?;
            println!("Seed data inserted ({inserted} new rows).");
        }
        Commands::Import { kind, csv } => {
            let pool = connect().await?;
            let inserted = db::import_csv(&pool, kind, &csv, config.season_start_month).await?;
            println!("Inserted {inserted} rows from {}.", csv.display());
        }
        Commands::Assess { scope, out } => {
            let result = run_assessment(&scope, &config).await?;
            let json = serde_json::to_string_pretty(&result)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Assessment written to {}.", path.display());
                }
                None => println!("{json}"),
            }
        }
        Commands::Report { scope, out } => {
            let result = run_assessment(&scope, &config).await?;
            let report = report::build_report(&result);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
