use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info, warn};

use crate::analytics::round_tenths;
use crate::error::StoreError;
use crate::models::{
    NewStudent, SearchFilter, StudentMetrics, StudentPatch, StudentProfile, StudentRecord,
    Subject, SubjectAverages, SubjectGrades, SubjectSnapshot,
};
use crate::risk::{self, ScoredStudent};
use crate::store::StudentStore;

const STUDENT_COLUMNS: &str = "id, name, student_id, grade_level, section, \
     math_grade, science_grade, english_grade, history_grade, arts_grade, pe_grade, \
     attendance_rate, participation_score";

pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed [`StudentStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<StudentRecord, StoreError> {
    let metrics = StudentMetrics {
        grades: SubjectGrades {
            math_grade: row.try_get("math_grade")?,
            science_grade: row.try_get("science_grade")?,
            english_grade: row.try_get("english_grade")?,
            history_grade: row.try_get("history_grade")?,
            arts_grade: row.try_get("arts_grade")?,
            pe_grade: row.try_get("pe_grade")?,
        },
        attendance_rate: row.try_get("attendance_rate")?,
        participation_score: row.try_get("participation_score")?,
    };

    // Derived columns are only a cache for SQL consumers; re-score from raw values.
    Ok(StudentRecord {
        id: row.try_get("id")?,
        profile: StudentProfile {
            name: row.try_get("name")?,
            student_id: row.try_get("student_id")?,
            grade_level: row.try_get("grade_level")?,
            section: row.try_get("section")?,
        },
        student: risk::score(&metrics)?,
    })
}

fn write_error(err: sqlx::Error, student_id: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateStudentId(student_id.to_string());
        }
    }
    StoreError::Database(err)
}

fn bind_student<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    profile: &'q StudentProfile,
    scored: &'q ScoredStudent,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    let metrics = scored.metrics();
    let grades = &metrics.grades;
    query
        .bind(&profile.name)
        .bind(&profile.student_id)
        .bind(&profile.grade_level)
        .bind(&profile.section)
        .bind(grades.math_grade)
        .bind(grades.science_grade)
        .bind(grades.english_grade)
        .bind(grades.history_grade)
        .bind(grades.arts_grade)
        .bind(grades.pe_grade)
        .bind(metrics.attendance_rate)
        .bind(metrics.participation_score)
        .bind(scored.average_grade())
        .bind(scored.performance_level().as_str())
        .bind(scored.prediction().as_str())
}

#[async_trait]
impl StudentStore for PgStore {
    async fn get(&self, id: i64) -> Result<Option<StudentRecord>, StoreError> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM student_dashboard.students WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn get_by_student_id(
        &self,
        student_id: &str,
    ) -> Result<Option<StudentRecord>, StoreError> {
        let query = format!(
            "SELECT {STUDENT_COLUMNS} FROM student_dashboard.students WHERE student_id = $1"
        );
        let row = sqlx::query(&query)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn create(&self, student: NewStudent) -> Result<StudentRecord, StoreError> {
        let scored = risk::score(&student.metrics)?;

        let query = sqlx::query(
            r#"
            INSERT INTO student_dashboard.students
            (name, student_id, grade_level, section,
             math_grade, science_grade, english_grade, history_grade, arts_grade, pe_grade,
             attendance_rate, participation_score,
             average_grade, performance_level, prediction)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (student_id) DO NOTHING
            RETURNING id
            "#,
        );
        let row = bind_student(query, &student.profile, &scored)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(StoreError::DuplicateStudentId(student.profile.student_id));
        };
        let id: i64 = row.try_get("id")?;
        info!(id, student_id = %student.profile.student_id, "student created");

        Ok(StudentRecord {
            id,
            profile: student.profile,
            student: scored,
        })
    }

    async fn update(
        &self,
        id: i64,
        patch: StudentPatch,
    ) -> Result<Option<StudentRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let select = format!(
            "SELECT {STUDENT_COLUMNS} FROM student_dashboard.students WHERE id = $1 FOR UPDATE"
        );
        let Some(row) = sqlx::query(&select)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let existing = record_from_row(&row)?;

        let (profile, metrics) = patch.merge(&existing.profile, existing.student.metrics());
        let scored = risk::score(&metrics)?;

        let query = sqlx::query(
            r#"
            UPDATE student_dashboard.students
            SET name = $1, student_id = $2, grade_level = $3, section = $4,
                math_grade = $5, science_grade = $6, english_grade = $7,
                history_grade = $8, arts_grade = $9, pe_grade = $10,
                attendance_rate = $11, participation_score = $12,
                average_grade = $13, performance_level = $14, prediction = $15
            WHERE id = $16
            "#,
        );
        bind_student(query, &profile, &scored)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|err| write_error(err, &profile.student_id))?;
        tx.commit().await?;

        debug!(id, level = %scored.performance_level(), "student updated");
        Ok(Some(StudentRecord {
            id,
            profile,
            student: scored,
        }))
    }

    async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM student_dashboard.students WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() > 0;
        if removed {
            info!(id, "student deleted");
        }
        Ok(removed)
    }

    async fn all(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let query = format!("SELECT {STUDENT_COLUMNS} FROM student_dashboard.students ORDER BY id");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn search(&self, filter: &SearchFilter) -> Result<Vec<StudentRecord>, StoreError> {
        let query_term = filter.query_term();
        let grade_term = filter.grade_term();

        let mut query = format!("SELECT {STUDENT_COLUMNS} FROM student_dashboard.students WHERE TRUE");
        if query_term.is_some() {
            query.push_str(
                " AND (strpos(lower(name), $1) > 0 OR strpos(lower(student_id), $1) > 0)",
            );
        }
        if grade_term.is_some() {
            let position = if query_term.is_some() { 2 } else { 1 };
            query.push_str(&format!(" AND strpos(grade_level, ${position}) > 0"));
        }
        query.push_str(" ORDER BY id");

        let mut rows = sqlx::query(&query);
        if let Some(value) = &query_term {
            rows = rows.bind(value);
        }
        if let Some(value) = &grade_term {
            rows = rows.bind(value);
        }

        let records = rows.fetch_all(&self.pool).await?;
        records.iter().map(record_from_row).collect()
    }

    async fn record_snapshot(&self, snapshot: &SubjectSnapshot) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (subject, average) in snapshot.averages.iter() {
            sqlx::query(
                r#"
                INSERT INTO student_dashboard.subject_snapshots (taken_on, subject, average)
                VALUES ($1, $2, $3)
                ON CONFLICT (taken_on, subject) DO UPDATE SET average = EXCLUDED.average
                "#,
            )
            .bind(snapshot.taken_on)
            .bind(subject.name())
            .bind(average)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn latest_snapshot(
        &self,
        before: NaiveDate,
    ) -> Result<Option<SubjectSnapshot>, StoreError> {
        let taken_on: Option<NaiveDate> = sqlx::query(
            "SELECT MAX(taken_on) AS taken_on FROM student_dashboard.subject_snapshots \
             WHERE taken_on < $1",
        )
        .bind(before)
        .fetch_one(&self.pool)
        .await?
        .try_get("taken_on")?;

        let Some(taken_on) = taken_on else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT subject, average FROM student_dashboard.subject_snapshots WHERE taken_on = $1",
        )
        .bind(taken_on)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("subject")?;
            if Subject::from_name(&name).is_none() {
                warn!(subject = %name, %taken_on, "ignoring unknown snapshot subject");
            }
            entries.push((name, row.try_get::<f64, _>("average")?));
        }

        match SubjectAverages::from_named(entries) {
            Ok(averages) => Ok(Some(SubjectSnapshot { taken_on, averages })),
            Err(missing) => {
                let missing: Vec<&str> = missing.iter().map(|subject| subject.name()).collect();
                warn!(%taken_on, ?missing, "ignoring incomplete subject snapshot");
                Ok(None)
            }
        }
    }
}

/// Imports students from a CSV file, skipping student IDs already on record.
pub async fn import_csv(store: &dyn StudentStore, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        name: String,
        student_id: String,
        grade_level: String,
        section: String,
        math_grade: i32,
        science_grade: i32,
        english_grade: i32,
        history_grade: i32,
        arts_grade: i32,
        pe_grade: i32,
        attendance_rate: f64,
        participation_score: i32,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = result.with_context(|| format!("malformed row on line {line}"))?;
        let student = NewStudent {
            profile: StudentProfile {
                name: row.name,
                student_id: row.student_id,
                grade_level: row.grade_level,
                section: row.section,
            },
            metrics: StudentMetrics {
                grades: SubjectGrades {
                    math_grade: row.math_grade,
                    science_grade: row.science_grade,
                    english_grade: row.english_grade,
                    history_grade: row.history_grade,
                    arts_grade: row.arts_grade,
                    pe_grade: row.pe_grade,
                },
                attendance_rate: row.attendance_rate,
                participation_score: row.participation_score,
            },
        };

        match store.create(student).await {
            Ok(_) => inserted += 1,
            Err(StoreError::DuplicateStudentId(student_id)) => {
                warn!(%student_id, line, "student already exists, skipping");
            }
            Err(err) => return Err(err).with_context(|| format!("failed to import line {line}")),
        }
    }

    info!(inserted, path = %csv_path.display(), "csv import finished");
    Ok(inserted)
}

/// Writes the dashboard export: one summary row per student.
pub fn export_csv(students: &[StudentRecord], out: &Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    writer.write_record([
        "Name",
        "Student ID",
        "Grade Level",
        "Average Grade",
        "Performance Level",
    ])?;

    for record in students {
        writer.write_record([
            record.profile.name.as_str(),
            record.profile.student_id.as_str(),
            record.profile.grade_level.as_str(),
            format!("{:.1}", round_tenths(record.student.average_grade())).as_str(),
            record.student.performance_level().as_str(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::seed::load_sample_data;
    use crate::store::MemoryStore;

    const HEADER: &str = "name,student_id,grade_level,section,math_grade,science_grade,\
english_grade,history_grade,arts_grade,pe_grade,attendance_rate,participation_score";

    fn write_csv(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{HEADER}").unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn imports_rows_and_skips_duplicates() {
        let store = MemoryStore::new();
        let file = write_csv(&[
            "Ava Park,STU100,9th Grade,Section A,88,91,85,79,95,90,93.5,82",
            "Leo Grant,STU101,10th Grade,Section C,61,58,64,70,66,72,74,60",
            "Ava Again,STU100,9th Grade,Section A,50,50,50,50,50,50,50,50",
        ]);

        let inserted = import_csv(&store, file.path()).await.unwrap();
        assert_eq!(inserted, 2);

        let ava = store.get_by_student_id("STU100").await.unwrap().unwrap();
        assert_eq!(ava.profile.name, "Ava Park");
        assert_eq!(ava.student.metrics().attendance_rate, 93.5);
    }

    #[tokio::test]
    async fn import_reports_invalid_line() {
        let store = MemoryStore::new();
        let file = write_csv(&[
            "Ava Park,STU100,9th Grade,Section A,88,91,85,79,95,90,93.5,82",
            "Bad Row,STU102,9th Grade,Section A,88,91,85,79,195,90,93.5,82",
        ]);

        let err = import_csv(&store, file.path()).await.unwrap_err();
        assert!(format!("{err:#}").contains("line 3"));
        assert!(format!("{err:#}").contains("artsGrade"));
    }

    #[tokio::test]
    async fn exports_summary_rows() {
        let store = MemoryStore::new();
        load_sample_data(&store).await;
        let students = store.all().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("students.csv");
        export_csv(&students, &out).unwrap();

        let contents = std::fs::read_to_string(&out).unwrap();
        let mut lines = contents.lines();
        assert_eq!(
            lines.next(),
            Some("Name,Student ID,Grade Level,Average Grade,Performance Level")
        );
        assert_eq!(
            lines.next(),
            Some("Sarah Johnson,STU001,10th Grade,91.2,Excellent")
        );
        assert_eq!(contents.lines().count(), 11);
    }
}
