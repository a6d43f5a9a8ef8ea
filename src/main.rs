use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use student_performance_dashboard::config::AppConfig;
use student_performance_dashboard::db::{self, PgStore};
use student_performance_dashboard::models::{
    NewStudent, SearchFilter, StudentMetrics, StudentPatch, StudentProfile, StudentRecord,
    SubjectGrades,
};
use student_performance_dashboard::store::{MemoryStore, StudentStore};
use student_performance_dashboard::{analytics, report, risk, seed, server};

#[derive(Parser)]
#[command(name = "performance-dashboard")]
#[command(about = "Student performance scoring and analytics dashboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StudentArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    student_id: String,
    #[arg(long)]
    grade_level: String,
    #[arg(long)]
    section: String,
    #[arg(long)]
    math: i32,
    #[arg(long)]
    science: i32,
    #[arg(long)]
    english: i32,
    #[arg(long)]
    history: i32,
    #[arg(long)]
    arts: i32,
    #[arg(long)]
    pe: i32,
    #[arg(long)]
    attendance: f64,
    #[arg(long)]
    participation: i32,
}

impl From<StudentArgs> for NewStudent {
    fn from(args: StudentArgs) -> Self {
        NewStudent {
            profile: StudentProfile {
                name: args.name,
                student_id: args.student_id,
                grade_level: args.grade_level,
                section: args.section,
            },
            metrics: StudentMetrics {
                grades: SubjectGrades {
                    math_grade: args.math,
                    science_grade: args.science,
                    english_grade: args.english,
                    history_grade: args.history,
                    arts_grade: args.arts,
                    pe_grade: args.pe,
                },
                attendance_rate: args.attendance,
                participation_score: args.participation,
            },
        }
    }
}

#[derive(Args)]
struct PatchArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    student_id: Option<String>,
    #[arg(long)]
    grade_level: Option<String>,
    #[arg(long)]
    section: Option<String>,
    #[arg(long)]
    math: Option<i32>,
    #[arg(long)]
    science: Option<i32>,
    #[arg(long)]
    english: Option<i32>,
    #[arg(long)]
    history: Option<i32>,
    #[arg(long)]
    arts: Option<i32>,
    #[arg(long)]
    pe: Option<i32>,
    #[arg(long)]
    attendance: Option<f64>,
    #[arg(long)]
    participation: Option<i32>,
}

impl From<PatchArgs> for StudentPatch {
    fn from(args: PatchArgs) -> Self {
        StudentPatch {
            name: args.name,
            student_id: args.student_id,
            grade_level: args.grade_level,
            section: args.section,
            math_grade: args.math,
            science_grade: args.science,
            english_grade: args.english,
            history_grade: args.history,
            arts_grade: args.arts,
            pe_grade: args.pe,
            attendance_rate: args.attendance,
            participation_score: args.participation,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load the sample students
    Seed,
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Export a per-student summary CSV
    Export {
        #[arg(long, default_value = "student_data.csv")]
        out: PathBuf,
    },
    /// Add a student
    Add(StudentArgs),
    /// Update fields of a student and re-score them
    Update {
        #[arg(long)]
        id: i64,
        #[command(flatten)]
        patch: PatchArgs,
    },
    /// Delete a student
    Delete {
        #[arg(long)]
        id: i64,
    },
    /// Show one student with recommendations
    Show {
        #[arg(long)]
        id: i64,
    },
    /// List students, optionally filtered
    List {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        grade: Option<String>,
    },
    /// Print overview, grade distribution and subject performance
    Stats,
    /// Record today's subject averages as the baseline for trend figures
    Snapshot {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Generate a markdown report
    #[command(group(
        ArgGroup::new("scope")
            .args(["query", "grade"])
            .multiple(false)
    ))]
    Report {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        grade: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the dashboard JSON API
    Serve {
        #[arg(long)]
        bind: Option<String>,
        /// Keep records in process memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_record(record: &StudentRecord) {
    println!(
        "- #{} {} ({}, {}, {}) avg {:.1}, {} / {}",
        record.id,
        record.profile.name,
        record.profile.student_id,
        record.profile.grade_level,
        record.profile.section,
        analytics::round_tenths(record.student.average_grade()),
        record.student.performance_level(),
        record.student.prediction()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    if let Commands::Serve {
        bind,
        in_memory: true,
    } = &cli.command
    {
        let bind = bind.clone().unwrap_or(config.bind);
        return server::serve(Arc::new(MemoryStore::new()), &bind).await;
    }

    let pool = db::connect(config.database_url()?, config.max_connections).await?;
    let store = PgStore::new(pool.clone());
    let today = Utc::now().date_naive();

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let created = seed::load_sample_data(&store).await;
            println!("Seed data inserted ({created} students).");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&store, &csv).await?;
            println!("Inserted {inserted} students from {}.", csv.display());
        }
        Commands::Export { out } => {
            let students = store.all().await?;
            db::export_csv(&students, &out)?;
            println!("Exported {} students to {}.", students.len(), out.display());
        }
        Commands::Add(args) => {
            let record = store.create(args.into()).await?;
            println!("Created student:");
            print_record(&record);
        }
        Commands::Update { id, patch } => match store.update(id, patch.into()).await? {
            Some(record) => {
                println!("Updated student:");
                print_record(&record);
            }
            None => println!("Student {id} not found."),
        },
        Commands::Delete { id } => {
            if store.delete(id).await? {
                println!("Deleted student {id}.");
            } else {
                println!("Student {id} not found.");
            }
        }
        Commands::Show { id } => {
            let Some(record) = store.get(id).await? else {
                println!("Student {id} not found.");
                return Ok(());
            };
            print_record(&record);
            println!(
                "  performance score {:.1}, risk tier {:?}",
                record.student.performance_score(),
                record.student.risk_tier()
            );
            for advice in risk::recommendations(&record.student) {
                println!("  * {advice}");
            }
        }
        Commands::List { query, grade } => {
            let filter = SearchFilter { q: query, grade };
            let students = store.search(&filter).await?;
            if students.is_empty() {
                println!("No students match.");
                return Ok(());
            }
            for record in &students {
                print_record(record);
            }
        }
        Commands::Stats => {
            let students = store.all().await?;
            let baseline = store.latest_snapshot(today).await?;
            let overview = analytics::overview(&students);
            let distribution = analytics::grade_distribution(&students);

            println!(
                "Students: {}, average grade {}, attendance {}, at risk {}",
                overview.total_students,
                overview.average_grade,
                overview.attendance_rate,
                overview.at_risk_students
            );
            println!(
                "Grade distribution: A {}%, B {}%, C {}%, D/F {}%",
                distribution.a, distribution.b, distribution.c, distribution.df
            );
            for row in
                analytics::subject_performance(&students, baseline.as_ref().map(|s| &s.averages))
            {
                println!(
                    "- {}: {:.1} ({:+.1})",
                    row.subject.name(),
                    row.average,
                    row.change
                );
            }
        }
        Commands::Snapshot { date } => {
            let taken_on = date.unwrap_or(today);
            let students = store.all().await?;
            match analytics::snapshot(&students, taken_on) {
                Some(snapshot) => {
                    store
                        .record_snapshot(&snapshot)
                        .await
                        .context("failed to record subject snapshot")?;
                    println!("Recorded subject averages for {taken_on}.");
                }
                None => println!("No students on record; nothing to snapshot."),
            }
        }
        Commands::Report { query, grade, out } => {
            let scope = grade.clone().or_else(|| query.clone());
            let filter = SearchFilter { q: query, grade };
            let students = store.search(&filter).await?;
            let baseline = store.latest_snapshot(today).await?;
            let report = report::build_report(scope.as_deref(), today, &students, baseline.as_ref());
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind, .. } => {
            let bind = bind.unwrap_or(config.bind);
            server::serve(Arc::new(store), &bind).await?;
        }
    }

    Ok(())
}
