use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

mod api;
mod collation;
mod config;
mod db;
mod error;
mod ledger;
mod memory;
mod models;
mod report;
mod service;
mod store;

use models::{AttendanceRecord, ClassFilter, NaturalKey, RecordMode};
use service::{LedgerService, RedeemRequest};
use store::RowStore;

#[derive(Parser)]
#[command(name = "mass-attendance")]
#[command(about = "Mass attendance and reward redemption ledger", long_about = None)]
struct Cli {
    /// Use a seeded in-process store instead of DATABASE_URL
    #[arg(long, global = true)]
    in_memory: bool,
    /// Visits needed for a reward (overrides ACHIEVEMENT_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo users, rosters and attendance
    Seed,
    /// Import attendance rows from a CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long, default_value = "import")]
        recorded_by: String,
    },
    /// List every class
    Classes,
    /// List the roster of a class
    Students {
        #[arg(long)]
        class: String,
    },
    /// Show the role and classes of an account
    Whoami {
        #[arg(long)]
        email: String,
    },
    /// Attendance and reward counts
    Stats {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "*")]
        class: String,
    },
    /// Students who reached the reward threshold
    Achieved {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "*")]
        class: String,
    },
    /// Attendance rows whose reward has not been handed out
    Unredeemed {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "*")]
        class: String,
    },
    /// Record one attendance
    Record {
        #[arg(long)]
        email: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        date: NaiveDate,
        /// Mark the reward as handed out on this date
        #[arg(long)]
        redeemed_on: Option<NaiveDate>,
        /// Overwrite the redemption state if the attendance already exists
        #[arg(long)]
        upsert: bool,
    },
    /// Mark one attendance as redeemed
    Redeem {
        #[arg(long)]
        email: String,
        #[arg(long)]
        class: String,
        #[arg(long)]
        student: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        redeem_date: Option<NaiveDate>,
    },
    /// Mark every row of a CSV (class,studentName,attendanceDate) as redeemed
    RedeemBatch {
        #[arg(long)]
        email: String,
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        redeem_date: Option<NaiveDate>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "*")]
        class: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Answer JSON action requests, one per line, on stdin/stdout
    Serve,
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env = config::Env::load()?;
    init_tracing()?;
    let threshold = env.threshold(cli.threshold)?;

    if cli.in_memory {
        info!("using seeded in-memory store");
        let service = LedgerService::new(memory::MemoryStore::seeded(), threshold);
        return run(cli.command, service).await;
    }

    let database_url = env
        .database_url
        .context("DATABASE_URL must be set to a Postgres instance (or pass --in-memory)")?;
    let pool = db::connect(&database_url).await?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        command => {
            let service = LedgerService::new(db::PgStore::new(pool), threshold);
            run(command, service).await?;
        }
    }

    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

async fn run<S: RowStore>(command: Commands, service: LedgerService<S>) -> anyhow::Result<()> {
    match command {
        Commands::InitDb | Commands::Seed => {
            bail!("init-db and seed need DATABASE_URL; drop --in-memory");
        }
        Commands::Import { csv, recorded_by } => {
            let inserted = store::import_csv(service.store(), &csv, &recorded_by).await?;
            println!("Inserted {inserted} attendance rows from {}.", csv.display());
        }
        Commands::Classes => {
            for class in service.classes().await? {
                println!("{class}");
            }
        }
        Commands::Students { class } => {
            let students = service.students_by_class(&class).await?;
            if students.is_empty() {
                println!("No students listed for {class}.");
            }
            for student in students {
                println!("- {} ({})", student.name, student.class);
            }
        }
        Commands::Whoami { email } => {
            let session = service.session(&email).await?;
            let profile = session.profile;
            println!(
                "{} is {} for [{}] (default class: {})",
                profile.email,
                profile.role.as_str(),
                profile.classes.join(", "),
                if profile.default_class.is_empty() {
                    "-"
                } else {
                    profile.default_class.as_str()
                }
            );
        }
        Commands::Stats { email, class } => {
            let session = service.session(&email).await?;
            let filter = ClassFilter::parse(&class);
            let stats = service.stats(&session, &filter).await?;
            let summary = service.redemption_summary(&session, &filter).await?;
            println!("Class: {}", stats.class);
            println!("Attendance records: {}", stats.total_records);
            println!(
                "Students reaching {} visits: {}",
                service.threshold(),
                stats.achieved_students
            );
            println!("Fully redeemed: {}", stats.redeemed_count);
            println!(
                "Rows redeemed / outstanding: {} / {}",
                summary.redeemed_records, summary.outstanding_records
            );
        }
        Commands::Achieved { email, class } => {
            let session = service.session(&email).await?;
            let students = service
                .achieved_students(&session, &ClassFilter::parse(&class))
                .await?;

            if students.is_empty() {
                println!("No student has reached the reward yet.");
                return Ok(());
            }

            for student in students {
                println!(
                    "- {} ({}) {} visits, {}{}",
                    student.student_name,
                    student.class,
                    student.attendance_count,
                    student.redemption_status,
                    if student.is_fully_redeemed { " ✓" } else { "" }
                );
            }
        }
        Commands::Unredeemed { email, class } => {
            let session = service.session(&email).await?;
            let records = service
                .unredeemed_records(&session, &ClassFilter::parse(&class))
                .await?;

            if records.is_empty() {
                println!("No unredeemed attendance.");
                return Ok(());
            }

            for record in records.iter() {
                println!(
                    "- {} {} {}",
                    record.class, record.student_name, record.attendance_date
                );
            }
            println!("{} rows outstanding.", records.len());
        }
        Commands::Record {
            email,
            class,
            student,
            date,
            redeemed_on,
            upsert,
        } => {
            let session = service.session(&email).await?;
            let mut entry = AttendanceRecord::new(&class, &student, date);
            if let Some(redeem_date) = redeemed_on {
                entry = entry.redeemed_on(redeem_date);
            }
            let mode = if upsert {
                RecordMode::Upsert
            } else {
                RecordMode::Create
            };
            service.record_attendance(&session, entry, mode).await?;
            println!("Recorded {student} ({class}) on {date}.");
        }
        Commands::Redeem {
            email,
            class,
            student,
            date,
            redeem_date,
        } => {
            let session = service.session(&email).await?;
            let key = NaturalKey::new(&class, &student, date);
            let redeem_date = redeem_date.unwrap_or_else(today);
            service
                .update_redeem_status(&session, &key, redeem_date)
                .await?;
            println!("Marked {key} redeemed on {redeem_date}.");
        }
        Commands::RedeemBatch {
            email,
            csv,
            redeem_date,
        } => {
            let session = service.session(&email).await?;
            let requests = read_redeem_csv(&csv, redeem_date.unwrap_or_else(today))?;
            let outcome = service
                .batch_update_redeem_status(&session, &requests)
                .await?;
            println!("Applied {} of {} updates.", outcome.applied_count, requests.len());
            for failure in outcome.failed {
                println!("- skipped {}: {}", failure.key, failure.reason);
            }
        }
        Commands::Report { email, class, out } => {
            let session = service.session(&email).await?;
            let filter = ClassFilter::parse(&class);
            let records = service.visible_records(&session, &filter).await?;
            let report = report::build_report(&filter, service.threshold(), today(), &records);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve => serve(&service).await?,
    }

    Ok(())
}

fn read_redeem_csv(path: &std::path::Path, default_date: NaiveDate) -> anyhow::Result<Vec<RedeemRequest>> {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct CsvRow {
        #[serde(alias = "className")]
        class: String,
        student_name: String,
        attendance_date: String,
        #[serde(default)]
        redeem_date: Option<String>,
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut requests = Vec::new();
    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let attendance_date = models::parse_date(&row.attendance_date)
            .with_context(|| format!("row {}: bad attendanceDate", line + 1))?;
        let redeem_date = match row.redeem_date.as_deref().map(str::trim) {
            None | Some("") => default_date,
            Some(raw) => models::parse_date(raw)
                .with_context(|| format!("row {}: bad redeemDate", line + 1))?,
        };
        requests.push(RedeemRequest {
            key: NaturalKey::new(&row.class, &row.student_name, attendance_date),
            redeem_date,
        });
    }
    Ok(requests)
}

async fn serve<S: RowStore>(service: &LedgerService<S>) -> anyhow::Result<()> {
    info!("serving JSON actions on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let resp = api::handle_line(service, &line).await;
        writeln!(stdout, "{resp}")?;
        stdout.flush()?;
    }

    info!("stdin closed, stopping");
    Ok(())
}
