use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use groupscholar_academic_risk::config::{self, WindowArgs};
use groupscholar_academic_risk::ingest::AssessmentRequest;
use groupscholar_academic_risk::models::RiskAssessment;
use groupscholar_academic_risk::report::{self, ReportInput};
use groupscholar_academic_risk::{db, grade_of, rank_at_risk, risk, RiskError};

#[derive(Parser)]
#[command(name = "academic-risk")]
#[command(about = "Academic risk scoring for Group Scholar schools", long_about = None)]
struct Cli {
    #[command(flatten)]
    windows: WindowArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Register an exam that results can be uploaded against
    CreateExam {
        #[arg(long)]
        name: String,
        #[arg(long)]
        term: String,
        #[arg(long)]
        academic_year: String,
    },
    /// Grade and import exam results from a CSV file
    ImportResults {
        #[arg(long)]
        exam_id: Uuid,
        #[arg(long)]
        csv: PathBuf,
    },
    /// Show the grade and points for a mark
    Grade {
        #[arg(allow_negative_numbers = true)]
        marks: f64,
    },
    /// Rank students at medium or high risk
    AtRisk {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print the ranking as JSON
        #[arg(long)]
        json: bool,
    },
    /// Score a JSON request without touching the database
    Assess {
        #[arg(long)]
        input: PathBuf,
        /// Reference time; overrides the request's `now` (defaults to the current time)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
        /// Include low-risk students, unranked
        #[arg(long)]
        all: bool,
    },
    /// Show a student's marks per exam and subject
    Trend {
        #[arg(long)]
        admission_number: String,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value = "academic-risk-report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    config::init_logging("info");
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<RiskError>() {
            Some(invalid) if invalid.is_client_error() => {
                eprintln!("invalid input: {invalid}");
                ExitCode::from(2)
            }
            _ => {
                eprintln!("error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = config::database_url()?;
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let windows = cli.windows.windows()?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&connect().await?).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&connect().await?).await?;
            println!("Seed data inserted.");
        }
        Commands::CreateExam {
            name,
            term,
            academic_year,
        } => {
            let id = db::create_exam(&connect().await?, &name, &term, &academic_year).await?;
            println!("Created exam {id}.");
        }
        Commands::ImportResults { exam_id, csv } => {
            let summary = db::import_results_csv(&connect().await?, exam_id, &csv).await?;
            println!(
                "Inserted {} results from {} ({} already recorded, {} unknown students, {} unknown subjects).",
                summary.inserted,
                csv.display(),
                summary.duplicates,
                summary.unknown_students,
                summary.unknown_subjects
            );
        }
        Commands::Grade { marks } => {
            let grade = grade_of(marks);
            println!("{marks}: {} ({} points)", grade.letter, grade.points);
        }
        Commands::AtRisk { class, limit, json } => {
            let pool = connect().await?;
            let now = Utc::now();
            let students = db::fetch_students(&pool, class.as_deref()).await?;
            let results =
                db::fetch_exam_results(&pool, windows.result_cutoff(now), class.as_deref()).await?;
            let attendance =
                db::fetch_attendance(&pool, windows.attendance_cutoff(now), class.as_deref())
                    .await?;

            let ids: Vec<Uuid> = students.iter().map(|s| s.student_id).collect();
            let assessments = risk::assess_cohort(&ids, &results, &attendance, now, &windows)?;
            let ranked = rank_at_risk(assessments);
            tracing::info!(
                assessed = ids.len(),
                at_risk = ranked.len(),
                "students scored"
            );

            let shown: Vec<RiskAssessment> = ranked.into_iter().take(limit).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else if shown.is_empty() {
                println!("No students at medium or high risk.");
            } else {
                println!("Students at risk:");
                for assessment in shown.iter() {
                    let profile = students
                        .iter()
                        .find(|s| s.student_id == assessment.student_id);
                    println!("- {}", report::describe(assessment, profile));
                }
            }
        }
        Commands::Assess { input, now, all } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("failed to read {}", input.display()))?;
            let request = AssessmentRequest::from_json(&text)
                .with_context(|| format!("{} is not a valid assessment request", input.display()))?;
            let now = now.or(request.now).unwrap_or_else(Utc::now);
            let windows = request.windows(windows)?;

            let mut assessments = Vec::new();
            for student in request.into_students()? {
                assessments.push(risk::assess_risk(
                    student.student_id,
                    &student.results,
                    &student.attendance,
                    now,
                    &windows,
                )?);
            }
            tracing::debug!(count = assessments.len(), %now, "assessed request");

            let output = if all {
                assessments
            } else {
                rank_at_risk(assessments)
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Trend {
            admission_number,
            json,
        } => {
            let pool = connect().await?;
            let students = db::fetch_students(&pool, None).await?;
            let student = students
                .iter()
                .find(|s| s.admission_number == admission_number)
                .with_context(|| format!("no student with admission number {admission_number}"))?;
            let results = db::fetch_student_results(&pool, student.student_id).await?;
            let exams = db::fetch_exams(&pool).await?;
            let subject_names = db::fetch_subject_names(&pool).await?;
            let trend = report::student_trend(student.student_id, &results, &exams, &subject_names);

            if json {
                println!("{}", serde_json::to_string_pretty(&trend)?);
            } else if trend.is_empty() {
                println!("No exam results recorded for {}.", student.full_name);
            } else {
                println!("Performance for {} ({}):", student.full_name, student.admission_number);
                for point in trend.iter() {
                    println!(
                        "- {} {} {} / {}: average {:.2} ({}), highest {:.1}",
                        point.academic_year,
                        point.term,
                        point.exam_name,
                        point.subject_name,
                        point.average_marks,
                        grade_of(point.average_marks).letter,
                        point.highest_marks
                    );
                }
            }
        }
        Commands::Report { class, out } => {
            let pool = connect().await?;
            let now = Utc::now();
            let students = db::fetch_students(&pool, class.as_deref()).await?;
            let results =
                db::fetch_exam_results(&pool, windows.result_cutoff(now), class.as_deref()).await?;
            let attendance =
                db::fetch_attendance(&pool, windows.attendance_cutoff(now), class.as_deref())
                    .await?;
            let subject_names = db::fetch_subject_names(&pool).await?;

            let ids: Vec<Uuid> = students.iter().map(|s| s.student_id).collect();
            let ranked =
                rank_at_risk(risk::assess_cohort(&ids, &results, &attendance, now, &windows)?);

            let report = report::build_report(&ReportInput {
                scope: class.as_deref(),
                as_of: now.date_naive(),
                ranked: &ranked,
                profiles: &students,
                results: &results,
                subject_names: &subject_names,
                attendance: &attendance,
            });
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
