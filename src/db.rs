use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::RiskError;
use crate::grading;
use crate::ingest;
use crate::models::{
    AttendanceRecord, AttendanceStatus, ExamInfo, ExamResult, Grade, ImportSummary,
    StudentProfile,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

struct SeedStudent {
    admission_number: &'static str,
    full_name: &'static str,
    class_name: &'static str,
    stream: Option<&'static str>,
    marks: [f64; 3],
    absences: i64,
}

const SEED_SUBJECTS: [(&str, &str); 3] = [
    ("MAT", "Mathematics"),
    ("ENG", "English"),
    ("BIO", "Biology"),
];

const SEED_STUDENTS: [SeedStudent; 4] = [
    SeedStudent {
        admission_number: "GS-001",
        full_name: "Avery Lee",
        class_name: "Form 2",
        stream: Some("East"),
        marks: [82.0, 76.0, 71.0],
        absences: 1,
    },
    SeedStudent {
        admission_number: "GS-002",
        full_name: "Jules Moreno",
        class_name: "Form 2",
        stream: Some("East"),
        marks: [38.0, 44.0, 35.0],
        absences: 9,
    },
    SeedStudent {
        admission_number: "GS-003",
        full_name: "Kiara Patel",
        class_name: "Form 2",
        stream: Some("West"),
        marks: [52.0, 39.0, 58.0],
        absences: 5,
    },
    SeedStudent {
        admission_number: "GS-004",
        full_name: "Tomas Njoroge",
        class_name: "Form 3",
        stream: None,
        marks: [61.0, 66.0, 57.0],
        absences: 2,
    },
];

/// Loads a small demo school: four students, three subjects, two recent
/// exams and three weeks of attendance. Safe to run repeatedly.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let now = Utc::now();

    let mut subject_ids = Vec::new();
    for (code, name) in SEED_SUBJECTS {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO academic_risk.subjects (id, code, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (code) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code)
        .bind(name)
        .fetch_one(pool)
        .await?
        .try_get("id")?;
        subject_ids.push(id);
    }

    let exams = [
        (
            Uuid::parse_str("6f1c2b7e-5a43-4d7e-9a0b-2f4c8e1d3a51")?,
            "Mid-term",
            now - Duration::days(45),
            0.0,
        ),
        (
            Uuid::parse_str("b2e9d4c0-71f3-4a6b-8c15-9d0e3f2a6b84")?,
            "Opener",
            now - Duration::days(12),
            3.0,
        ),
    ];

    for (exam_id, name, created_at, _) in exams.iter() {
        sqlx::query(
            r#"
            INSERT INTO academic_risk.exams (id, name, term, academic_year, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET created_at = EXCLUDED.created_at
            "#,
        )
        .bind(exam_id)
        .bind(*name)
        .bind("Term 1")
        .bind("2026")
        .bind(created_at)
        .execute(pool)
        .await?;
    }

    for student in SEED_STUDENTS.iter() {
        let student_id: Uuid = sqlx::query(
            r#"
            INSERT INTO academic_risk.students (id, admission_number, full_name, class_name, stream)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (admission_number) DO UPDATE
            SET full_name = EXCLUDED.full_name,
                class_name = EXCLUDED.class_name,
                stream = EXCLUDED.stream
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student.admission_number)
        .bind(student.full_name)
        .bind(student.class_name)
        .bind(student.stream)
        .fetch_one(pool)
        .await?
        .try_get("id")?;

        for (exam_id, _, _, bump) in exams.iter() {
            for (subject_id, base) in subject_ids.iter().zip(student.marks) {
                let marks = base + bump;
                let grade = grading::grade_of(marks);
                insert_result(pool, student_id, *exam_id, *subject_id, marks, grade).await?;
            }
        }

        for days_ago in 1..=21 {
            let status = if days_ago <= student.absences {
                AttendanceStatus::Absent
            } else if days_ago % 7 == 0 {
                AttendanceStatus::Late
            } else {
                AttendanceStatus::Present
            };
            sqlx::query(
                r#"
                INSERT INTO academic_risk.attendance (id, student_id, date, status)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (student_id, date) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(student_id)
            .bind((now - Duration::days(days_ago)).date_naive())
            .bind(status.as_str())
            .execute(pool)
            .await?;
        }
    }

    tracing::info!(
        students = SEED_STUDENTS.len(),
        subjects = SEED_SUBJECTS.len(),
        "seed data loaded"
    );
    Ok(())
}

/// Returns `true` when the row was new.
async fn insert_result(
    pool: &PgPool,
    student_id: Uuid,
    exam_id: Uuid,
    subject_id: Uuid,
    marks: f64,
    grade: Grade,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO academic_risk.exam_results
        (id, student_id, exam_id, subject_id, marks_obtained, grade, points)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (student_id, exam_id, subject_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(exam_id)
    .bind(subject_id)
    .bind(marks)
    .bind(grade.letter)
    .bind(i16::from(grade.points))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn create_exam(
    pool: &PgPool,
    name: &str,
    term: &str,
    academic_year: &str,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO academic_risk.exams (id, name, term, academic_year)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(term)
    .bind(academic_year)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn fetch_students(
    pool: &PgPool,
    class_name: Option<&str>,
) -> anyhow::Result<Vec<StudentProfile>> {
    let mut query = String::from(
        "SELECT id, admission_number, full_name, class_name, stream \
         FROM academic_risk.students",
    );
    if class_name.is_some() {
        query.push_str(" WHERE class_name = $1");
    }
    query.push_str(" ORDER BY admission_number");

    let mut rows = sqlx::query(&query);
    if let Some(value) = class_name {
        rows = rows.bind(value);
    }

    let mut students = Vec::new();
    for row in rows.fetch_all(pool).await? {
        students.push(StudentProfile {
            student_id: row.try_get("id")?,
            admission_number: row.try_get("admission_number")?,
            full_name: row.try_get("full_name")?,
            class_name: row.try_get("class_name")?,
            stream: row.try_get("stream")?,
        });
    }

    Ok(students)
}

/// Results for exams created after `since`.
pub async fn fetch_exam_results(
    pool: &PgPool,
    since: DateTime<Utc>,
    class_name: Option<&str>,
) -> anyhow::Result<Vec<ExamResult>> {
    let mut query = String::from(
        "SELECT er.student_id, er.subject_id, er.exam_id, er.marks_obtained, \
         e.created_at AS exam_created_at \
         FROM academic_risk.exam_results er \
         JOIN academic_risk.exams e ON e.id = er.exam_id \
         JOIN academic_risk.students st ON st.id = er.student_id \
         WHERE e.created_at > $1",
    );
    if class_name.is_some() {
        query.push_str(" AND st.class_name = $2");
    }

    let mut rows = sqlx::query(&query).bind(since);
    if let Some(value) = class_name {
        rows = rows.bind(value);
    }

    let mut results = Vec::new();
    for row in rows.fetch_all(pool).await? {
        results.push(ExamResult {
            student_id: row.try_get("student_id")?,
            subject_id: row.try_get("subject_id")?,
            exam_id: row.try_get("exam_id")?,
            marks_obtained: row.try_get("marks_obtained")?,
            exam_created_at: row.try_get("exam_created_at")?,
        });
    }

    Ok(results)
}

/// Every result a student has, regardless of age.
pub async fn fetch_student_results(
    pool: &PgPool,
    student_id: Uuid,
) -> anyhow::Result<Vec<ExamResult>> {
    let rows = sqlx::query(
        r#"
        SELECT er.student_id, er.subject_id, er.exam_id, er.marks_obtained,
               e.created_at AS exam_created_at
        FROM academic_risk.exam_results er
        JOIN academic_risk.exams e ON e.id = er.exam_id
        WHERE er.student_id = $1
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut results = Vec::new();
    for row in rows {
        results.push(ExamResult {
            student_id: row.try_get("student_id")?,
            subject_id: row.try_get("subject_id")?,
            exam_id: row.try_get("exam_id")?,
            marks_obtained: row.try_get("marks_obtained")?,
            exam_created_at: row.try_get("exam_created_at")?,
        });
    }
    Ok(results)
}

pub async fn fetch_exams(pool: &PgPool) -> anyhow::Result<HashMap<Uuid, ExamInfo>> {
    let rows = sqlx::query(
        "SELECT id, name, term, academic_year, created_at FROM academic_risk.exams",
    )
    .fetch_all(pool)
    .await?;

    let mut exams = HashMap::new();
    for row in rows {
        let exam_id: Uuid = row.try_get("id")?;
        exams.insert(
            exam_id,
            ExamInfo {
                exam_id,
                name: row.try_get("name")?,
                term: row.try_get("term")?,
                academic_year: row.try_get("academic_year")?,
                created_at: row.try_get("created_at")?,
            },
        );
    }
    Ok(exams)
}

/// Attendance dated after `since`.
pub async fn fetch_attendance(
    pool: &PgPool,
    since: NaiveDate,
    class_name: Option<&str>,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut query = String::from(
        "SELECT a.student_id, a.date, a.status \
         FROM academic_risk.attendance a \
         JOIN academic_risk.students st ON st.id = a.student_id \
         WHERE a.date > $1",
    );
    if class_name.is_some() {
        query.push_str(" AND st.class_name = $2");
    }

    let mut rows = sqlx::query(&query).bind(since);
    if let Some(value) = class_name {
        rows = rows.bind(value);
    }

    let mut records = Vec::new();
    for row in rows.fetch_all(pool).await? {
        let student_id: Uuid = row.try_get("student_id")?;
        let status: String = row.try_get("status")?;
        let status = AttendanceStatus::parse(&status).ok_or_else(|| RiskError::InvalidStatus {
            record: format!("attendance for student {student_id}"),
            status: status.clone(),
        })?;
        records.push(AttendanceRecord {
            student_id,
            date: row.try_get("date")?,
            status,
        });
    }

    Ok(records)
}

pub async fn fetch_subject_names(pool: &PgPool) -> anyhow::Result<HashMap<Uuid, String>> {
    let rows = sqlx::query("SELECT id, name FROM academic_risk.subjects")
        .fetch_all(pool)
        .await?;

    let mut names = HashMap::new();
    for row in rows {
        names.insert(row.try_get("id")?, row.try_get("name")?);
    }
    Ok(names)
}

/// Grades and stores an exam result upload. Rows naming an unknown student or
/// subject are skipped with a warning; rows already recorded are left untouched.
pub async fn import_results_csv(
    pool: &PgPool,
    exam_id: Uuid,
    csv_path: &std::path::Path,
) -> anyhow::Result<ImportSummary> {
    let exam_exists = sqlx::query("SELECT 1 FROM academic_risk.exams WHERE id = $1")
        .bind(exam_id)
        .fetch_optional(pool)
        .await?
        .is_some();
    if !exam_exists {
        anyhow::bail!("exam {exam_id} does not exist");
    }

    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let uploads = ingest::parse_results_csv(file)?;
    let mut summary = ImportSummary::default();

    for upload in uploads {
        let student_id: Option<Uuid> = sqlx::query(
            "SELECT id FROM academic_risk.students WHERE admission_number = $1",
        )
        .bind(&upload.admission_number)
        .fetch_optional(pool)
        .await?
        .map(|row| row.try_get("id"))
        .transpose()?;

        let Some(student_id) = student_id else {
            tracing::warn!(admission_number = %upload.admission_number, "student not found");
            summary.unknown_students += 1;
            continue;
        };

        let subject_id: Option<Uuid> =
            sqlx::query("SELECT id FROM academic_risk.subjects WHERE code = $1")
                .bind(&upload.subject_code)
                .fetch_optional(pool)
                .await?
                .map(|row| row.try_get("id"))
                .transpose()?;

        let Some(subject_id) = subject_id else {
            tracing::warn!(subject_code = %upload.subject_code, "subject not found");
            summary.unknown_subjects += 1;
            continue;
        };

        let inserted = insert_result(
            pool,
            student_id,
            exam_id,
            subject_id,
            upload.marks_obtained,
            upload.grade,
        )
        .await?;
        if inserted {
            summary.inserted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    tracing::info!(
        %exam_id,
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        "exam results imported"
    );
    Ok(summary)
}
