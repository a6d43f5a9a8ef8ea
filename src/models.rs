use std::borrow::Borrow;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::InvalidMetricsError;
use crate::risk::ScoredStudent;

/// The six graded subjects, in dashboard order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Subject {
    Mathematics,
    Science,
    English,
    History,
    Arts,
    #[serde(rename = "PE")]
    Pe,
}

impl Subject {
    pub const ALL: [Subject; 6] = [
        Subject::Mathematics,
        Subject::Science,
        Subject::English,
        Subject::History,
        Subject::Arts,
        Subject::Pe,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Subject::Mathematics => "Mathematics",
            Subject::Science => "Science",
            Subject::English => "English",
            Subject::History => "History",
            Subject::Arts => "Arts",
            Subject::Pe => "PE",
        }
    }

    pub fn from_name(name: &str) -> Option<Subject> {
        Subject::ALL.into_iter().find(|subject| subject.name() == name)
    }

    /// Field name used on the wire and in validation errors.
    pub fn field(self) -> &'static str {
        match self {
            Subject::Mathematics => "mathGrade",
            Subject::Science => "scienceGrade",
            Subject::English => "englishGrade",
            Subject::History => "historyGrade",
            Subject::Arts => "artsGrade",
            Subject::Pe => "peGrade",
        }
    }

    pub fn grade(self, grades: &SubjectGrades) -> i32 {
        match self {
            Subject::Mathematics => grades.math_grade,
            Subject::Science => grades.science_grade,
            Subject::English => grades.english_grade,
            Subject::History => grades.history_grade,
            Subject::Arts => grades.arts_grade,
            Subject::Pe => grades.pe_grade,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectGrades {
    pub math_grade: i32,
    pub science_grade: i32,
    pub english_grade: i32,
    pub history_grade: i32,
    pub arts_grade: i32,
    pub pe_grade: i32,
}

impl SubjectGrades {
    pub fn uniform(grade: i32) -> Self {
        Self {
            math_grade: grade,
            science_grade: grade,
            english_grade: grade,
            history_grade: grade,
            arts_grade: grade,
            pe_grade: grade,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Subject, i32)> + '_ {
        Subject::ALL
            .into_iter()
            .map(move |subject| (subject, subject.grade(self)))
    }
}

/// Raw per-student inputs to scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentMetrics {
    #[serde(flatten)]
    pub grades: SubjectGrades,
    pub attendance_rate: f64,
    pub participation_score: i32,
}

impl StudentMetrics {
    /// Checks every field against its `[0, 100]` domain, reporting the first
    /// offender.
    pub fn validate(&self) -> Result<(), InvalidMetricsError> {
        for (subject, grade) in self.grades.iter() {
            check_range(subject.field(), f64::from(grade))?;
        }
        check_range("attendanceRate", self.attendance_rate)?;
        check_range("participationScore", f64::from(self.participation_score))
    }
}

fn check_range(field: &'static str, value: f64) -> Result<(), InvalidMetricsError> {
    // NaN fails the range test too.
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(InvalidMetricsError { field, value })
    }
}

/// Identity and placement fields of a student record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub name: String,
    pub student_id: String,
    pub grade_level: String,
    pub section: String,
}

/// Request body for creating a student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStudent {
    #[serde(flatten)]
    pub profile: StudentProfile,
    #[serde(flatten)]
    pub metrics: StudentMetrics,
}

/// Partial update; unset fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub student_id: Option<String>,
    pub grade_level: Option<String>,
    pub section: Option<String>,
    pub math_grade: Option<i32>,
    pub science_grade: Option<i32>,
    pub english_grade: Option<i32>,
    pub history_grade: Option<i32>,
    pub arts_grade: Option<i32>,
    pub pe_grade: Option<i32>,
    pub attendance_rate: Option<f64>,
    pub participation_score: Option<i32>,
}

impl StudentPatch {
    /// Overlays the patch on an existing profile and metrics.
    pub fn merge(
        &self,
        profile: &StudentProfile,
        metrics: &StudentMetrics,
    ) -> (StudentProfile, StudentMetrics) {
        let profile = StudentProfile {
            name: self.name.clone().unwrap_or_else(|| profile.name.clone()),
            student_id: self
                .student_id
                .clone()
                .unwrap_or_else(|| profile.student_id.clone()),
            grade_level: self
                .grade_level
                .clone()
                .unwrap_or_else(|| profile.grade_level.clone()),
            section: self.section.clone().unwrap_or_else(|| profile.section.clone()),
        };
        let grades = &metrics.grades;
        let metrics = StudentMetrics {
            grades: SubjectGrades {
                math_grade: self.math_grade.unwrap_or(grades.math_grade),
                science_grade: self.science_grade.unwrap_or(grades.science_grade),
                english_grade: self.english_grade.unwrap_or(grades.english_grade),
                history_grade: self.history_grade.unwrap_or(grades.history_grade),
                arts_grade: self.arts_grade.unwrap_or(grades.arts_grade),
                pe_grade: self.pe_grade.unwrap_or(grades.pe_grade),
            },
            attendance_rate: self.attendance_rate.unwrap_or(metrics.attendance_rate),
            participation_score: self
                .participation_score
                .unwrap_or(metrics.participation_score),
        };
        (profile, metrics)
    }
}

/// A stored student: storage id, profile and the scored metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRecord {
    pub id: i64,
    #[serde(flatten)]
    pub profile: StudentProfile,
    #[serde(flatten)]
    pub student: ScoredStudent,
}

impl Borrow<ScoredStudent> for StudentRecord {
    fn borrow(&self) -> &ScoredStudent {
        &self.student
    }
}

/// Name/ID query plus optional grade-level filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchFilter {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
}

impl SearchFilter {
    /// Lowercased name/ID needle, if any.
    pub fn query_term(&self) -> Option<String> {
        self.q
            .as_deref()
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase)
    }

    /// Substring the grade level must contain: "Grade 10" becomes "10".
    pub fn grade_term(&self) -> Option<String> {
        match self.grade.as_deref() {
            None | Some("") | Some("All Grades") => None,
            Some(grade) => Some(grade.replacen("Grade ", "", 1)),
        }
    }

    pub fn matches(&self, profile: &StudentProfile) -> bool {
        let matches_query = self.query_term().map_or(true, |query| {
            profile.name.to_lowercase().contains(&query)
                || profile.student_id.to_lowercase().contains(&query)
        });
        let matches_grade = self
            .grade_term()
            .map_or(true, |grade| profile.grade_level.contains(&grade));

        matches_query && matches_grade
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewStats {
    pub total_students: usize,
    pub average_grade: String,
    pub attendance_rate: String,
    pub at_risk_students: usize,
}

/// Percentage of students per letter band, each rounded on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: u32,
    #[serde(rename = "B")]
    pub b: u32,
    #[serde(rename = "C")]
    pub c: u32,
    #[serde(rename = "DF")]
    pub df: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SubjectPerformance {
    pub subject: Subject,
    pub average: f64,
    pub change: f64,
}

/// Unrounded per-subject mean grade.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SubjectAverages([f64; 6]);

impl SubjectAverages {
    pub fn get(&self, subject: Subject) -> f64 {
        self.0[subject.index()]
    }

    pub fn set(&mut self, subject: Subject, average: f64) {
        self.0[subject.index()] = average;
    }

    /// Collects averages keyed by subject name. Unknown names are ignored;
    /// `Err` lists the subjects that had no entry.
    pub fn from_named<I, N>(entries: I) -> Result<Self, Vec<Subject>>
    where
        I: IntoIterator<Item = (N, f64)>,
        N: AsRef<str>,
    {
        let mut averages = SubjectAverages::default();
        let mut seen = [false; 6];
        for (name, average) in entries {
            if let Some(subject) = Subject::from_name(name.as_ref()) {
                averages.set(subject, average);
                seen[subject.index()] = true;
            }
        }

        let missing: Vec<Subject> = Subject::ALL
            .into_iter()
            .filter(|subject| !seen[subject.index()])
            .collect();
        if missing.is_empty() {
            Ok(averages)
        } else {
            Err(missing)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Subject, f64)> + '_ {
        Subject::ALL
            .into_iter()
            .map(move |subject| (subject, self.get(subject)))
    }
}

/// Subject averages recorded on a given day; the baseline for trend figures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectSnapshot {
    pub taken_on: NaiveDate,
    pub averages: SubjectAverages,
}
