//! Population-level views over scored students.
//!
//! Every view is recomputed from the full collection it is handed and
//! returns a neutral value for an empty one.

use std::borrow::Borrow;
use std::fmt;

use chrono::NaiveDate;

use crate::models::{
    GradeDistribution, OverviewStats, Subject, SubjectAverages, SubjectPerformance,
    SubjectSnapshot,
};
use crate::risk::{PerformanceLevel, ScoredStudent};

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub fn from_average(average: f64) -> Self {
        match average {
            a if a >= 90.0 => LetterGrade::A,
            a if a >= 80.0 => LetterGrade::B,
            a if a >= 70.0 => LetterGrade::C,
            a if a >= 60.0 => LetterGrade::D,
            _ => LetterGrade::F,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LetterGrade::A => "A",
            LetterGrade::B => "B",
            LetterGrade::C => "C",
            LetterGrade::D => "D",
            LetterGrade::F => "F",
        }
    }
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rounds to one decimal place, halves toward positive infinity.
pub fn round_tenths(value: f64) -> f64 {
    (value * 10.0 + 0.5).floor() / 10.0
}

/// Formats `value` with one decimal place from its exact binary value,
/// rounding exact ties away from zero like a browser's `toFixed(1)`.
pub fn to_fixed_tenths(value: f64) -> String {
    let magnitude = value.abs();
    // Only quarters (x.25, x.75) land exactly on a tenths tie.
    let exact_tie = (magnitude * 4.0).fract() == 0.0 && (magnitude * 2.0).fract() != 0.0;
    if exact_tie {
        let rounded = ((magnitude * 10.0).floor() + 1.0) / 10.0;
        format!("{:.1}", rounded.copysign(value))
    } else {
        format!("{value:.1}")
    }
}

fn scored<S: Borrow<ScoredStudent>>(student: &S) -> &ScoredStudent {
    <S as Borrow<ScoredStudent>>::borrow(student)
}

fn percent_of(count: usize, total: usize) -> u32 {
    (count as f64 / total as f64 * 100.0 + 0.5).floor() as u32
}

fn mean<S, F>(students: &[S], value: F) -> f64
where
    S: Borrow<ScoredStudent>,
    F: Fn(&ScoredStudent) -> f64,
{
    let total: f64 = students.iter().map(|s| value(scored(s))).sum();
    total / students.len() as f64
}

pub fn overview<S: Borrow<ScoredStudent>>(students: &[S]) -> OverviewStats {
    if students.is_empty() {
        return OverviewStats {
            total_students: 0,
            average_grade: NOT_AVAILABLE.to_string(),
            attendance_rate: NOT_AVAILABLE.to_string(),
            at_risk_students: 0,
        };
    }

    let average_grade = mean(students, ScoredStudent::average_grade);
    let attendance = mean(students, |s| s.metrics().attendance_rate);
    let at_risk_students = students
        .iter()
        .filter(|s| scored(*s).performance_level() == PerformanceLevel::AtRisk)
        .count();

    OverviewStats {
        total_students: students.len(),
        average_grade: LetterGrade::from_average(average_grade).to_string(),
        attendance_rate: format!("{}%", to_fixed_tenths(attendance)),
        at_risk_students,
    }
}

pub fn grade_distribution<S: Borrow<ScoredStudent>>(students: &[S]) -> GradeDistribution {
    let total = students.len();
    if total == 0 {
        return GradeDistribution::default();
    }

    let (mut a, mut b, mut c, mut df) = (0usize, 0usize, 0usize, 0usize);
    for student in students {
        match LetterGrade::from_average(scored(student).average_grade()) {
            LetterGrade::A => a += 1,
            LetterGrade::B => b += 1,
            LetterGrade::C => c += 1,
            LetterGrade::D | LetterGrade::F => df += 1,
        }
    }

    GradeDistribution {
        a: percent_of(a, total),
        b: percent_of(b, total),
        c: percent_of(c, total),
        df: percent_of(df, total),
    }
}

/// Unrounded mean grade per subject, or `None` for an empty population.
pub fn subject_averages<S: Borrow<ScoredStudent>>(students: &[S]) -> Option<SubjectAverages> {
    if students.is_empty() {
        return None;
    }

    let mut averages = SubjectAverages::default();
    for subject in Subject::ALL {
        averages.set(
            subject,
            mean(students, |s| f64::from(subject.grade(&s.metrics().grades))),
        );
    }
    Some(averages)
}

pub fn snapshot<S: Borrow<ScoredStudent>>(
    students: &[S],
    taken_on: NaiveDate,
) -> Option<SubjectSnapshot> {
    subject_averages(students).map(|averages| SubjectSnapshot { taken_on, averages })
}

/// Per-subject average with its change against `baseline`. Without a
/// baseline the change is reported as zero.
pub fn subject_performance<S: Borrow<ScoredStudent>>(
    students: &[S],
    baseline: Option<&SubjectAverages>,
) -> Vec<SubjectPerformance> {
    let Some(current) = subject_averages(students) else {
        return Vec::new();
    };

    current
        .iter()
        .map(|(subject, average)| SubjectPerformance {
            subject,
            average: round_tenths(average),
            change: baseline
                .map(|previous| round_tenths(average - previous.get(subject)))
                .unwrap_or(0.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StudentMetrics, StudentProfile, StudentRecord, SubjectGrades};
    use crate::risk::score;

    fn student(grade: i32, attendance_rate: f64, participation_score: i32) -> ScoredStudent {
        score(&StudentMetrics {
            grades: SubjectGrades::uniform(grade),
            attendance_rate,
            participation_score,
        })
        .unwrap()
    }

    #[test]
    fn letter_bands() {
        assert_eq!(LetterGrade::from_average(90.0), LetterGrade::A);
        assert_eq!(LetterGrade::from_average(89.9), LetterGrade::B);
        assert_eq!(LetterGrade::from_average(70.0), LetterGrade::C);
        assert_eq!(LetterGrade::from_average(60.0), LetterGrade::D);
        assert_eq!(LetterGrade::from_average(59.9), LetterGrade::F);
    }

    #[test]
    fn rounds_halves_up() {
        assert_eq!(round_tenths(92.25), 92.3);
        assert_eq!(round_tenths(-0.25), -0.2);
        assert_eq!(round_tenths(77.0), 77.0);
    }

    #[test]
    fn fixed_tenths_uses_the_exact_binary_value() {
        // 86.05 is stored just below the tie, 1.45 likewise.
        assert_eq!(to_fixed_tenths(86.05), "86.0");
        assert_eq!(to_fixed_tenths(1.45), "1.4");
        assert_eq!(to_fixed_tenths(72.0 + 2.0 / 3.0), "72.7");
        assert_eq!(to_fixed_tenths(90.5), "90.5");
        assert_eq!(to_fixed_tenths(100.0), "100.0");
    }

    #[test]
    fn fixed_tenths_rounds_exact_ties_away_from_zero() {
        assert_eq!(to_fixed_tenths(92.25), "92.3");
        assert_eq!(to_fixed_tenths(92.75), "92.8");
        assert_eq!(to_fixed_tenths(0.25), "0.3");
        assert_eq!(to_fixed_tenths(-0.25), "-0.3");
    }

    #[test]
    fn empty_overview_is_neutral() {
        let students: Vec<ScoredStudent> = Vec::new();
        assert_eq!(
            overview(&students),
            OverviewStats {
                total_students: 0,
                average_grade: "N/A".to_string(),
                attendance_rate: "N/A".to_string(),
                at_risk_students: 0,
            }
        );
    }

    #[test]
    fn overview_counts_bottom_band_only() {
        let students = vec![
            student(95, 98.0, 92),
            student(60, 70.0, 60),
            student(40, 50.0, 40),
        ];
        let stats = overview(&students);
        assert_eq!(stats.total_students, 3);
        assert_eq!(stats.average_grade, "D");
        assert_eq!(stats.attendance_rate, "72.7%");
        // The "Below Average" student carries prediction "At Risk" but is not counted.
        assert_eq!(stats.at_risk_students, 1);
    }

    #[test]
    fn overview_formats_one_decimal() {
        let students = vec![student(85, 90.0, 88), student(85, 91.0, 88)];
        let stats = overview(&students);
        assert_eq!(stats.average_grade, "B");
        assert_eq!(stats.attendance_rate, "90.5%");
    }

    #[test]
    fn overview_attendance_follows_stored_value() {
        let stats = overview(&[student(85, 86.05, 88)]);
        assert_eq!(stats.attendance_rate, "86.0%");

        let stats = overview(&[student(85, 92.0, 88), student(85, 92.5, 88)]);
        assert_eq!(stats.attendance_rate, "92.3%");

        let stats = overview(&[student(85, 92.5, 88), student(85, 93.0, 88)]);
        assert_eq!(stats.attendance_rate, "92.8%");
    }

    #[test]
    fn overview_over_stored_records() {
        let records: Vec<StudentRecord> = [(40, 50.0), (90, 95.0)]
            .into_iter()
            .enumerate()
            .map(|(i, (grade, attendance))| StudentRecord {
                id: i as i64 + 1,
                profile: StudentProfile {
                    name: format!("Student {i}"),
                    student_id: format!("STU{i:03}"),
                    grade_level: "10th Grade".to_string(),
                    section: "Section A".to_string(),
                },
                student: student(grade, attendance, grade),
            })
            .collect();

        let stats = overview(&records);
        assert_eq!(stats.total_students, 2);
        assert_eq!(stats.attendance_rate, "72.5%");
        assert_eq!(stats.at_risk_students, 1);
        assert_eq!(grade_distribution(&records).a, 50);
    }

    #[test]
    fn distribution_of_all_a_students() {
        let students = vec![student(95, 90.0, 90); 4];
        assert_eq!(
            grade_distribution(&students),
            GradeDistribution {
                a: 100,
                b: 0,
                c: 0,
                df: 0
            }
        );
    }

    #[test]
    fn distribution_rounds_each_bucket_independently() {
        let students = vec![
            student(95, 90.0, 90),
            student(85, 90.0, 90),
            student(75, 90.0, 90),
        ];
        let distribution = grade_distribution(&students);
        assert_eq!(distribution.a, 33);
        assert_eq!(distribution.b, 33);
        assert_eq!(distribution.c, 33);
        assert_eq!(distribution.df, 0);
        let sum = distribution.a + distribution.b + distribution.c + distribution.df;
        assert_eq!(sum, 99);
    }

    #[test]
    fn distribution_merges_d_and_f() {
        let students = vec![
            student(65, 90.0, 90),
            student(30, 90.0, 90),
            student(95, 90.0, 90),
            student(72, 90.0, 90),
            student(81, 90.0, 90),
            student(99, 90.0, 90),
            student(99, 90.0, 90),
            student(99, 90.0, 90),
        ];
        let distribution = grade_distribution(&students);
        // 4/8, 1/8 (12.5 rounds up), 1/8, 2/8
        assert_eq!(distribution.a, 50);
        assert_eq!(distribution.b, 13);
        assert_eq!(distribution.c, 13);
        assert_eq!(distribution.df, 25);
    }

    #[test]
    fn empty_distribution_is_zero() {
        let students: Vec<ScoredStudent> = Vec::new();
        assert_eq!(grade_distribution(&students), GradeDistribution::default());
    }

    #[test]
    fn single_student_subject_averages_match_grades() {
        let scored = score(&StudentMetrics {
            grades: SubjectGrades {
                math_grade: 92,
                science_grade: 88,
                english_grade: 94,
                history_grade: 87,
                arts_grade: 91,
                pe_grade: 95,
            },
            attendance_rate: 96.0,
            participation_score: 88,
        })
        .unwrap();
        let performance = subject_performance(&[scored.clone()], None);

        assert_eq!(performance.len(), 6);
        for (row, subject) in performance.iter().zip(Subject::ALL) {
            assert_eq!(row.subject, subject);
            assert_eq!(row.average, f64::from(subject.grade(&scored.metrics().grades)));
            assert_eq!(row.change, 0.0);
        }
    }

    #[test]
    fn subject_change_is_measured_against_baseline() {
        let students = vec![student(80, 90.0, 90), student(81, 90.0, 90)];
        let mut baseline = SubjectAverages::default();
        for subject in Subject::ALL {
            baseline.set(subject, 78.25);
        }
        baseline.set(Subject::Arts, 82.0);

        let performance = subject_performance(&students, Some(&baseline));
        assert_eq!(performance[0].average, 80.5);
        assert_eq!(performance[0].change, 2.3);
        assert_eq!(performance[4].subject, Subject::Arts);
        assert_eq!(performance[4].change, -1.5);
    }

    #[test]
    fn empty_subject_performance() {
        let students: Vec<ScoredStudent> = Vec::new();
        assert!(subject_performance(&students, None).is_empty());
        assert!(snapshot(&students, NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()).is_none());
    }

    #[test]
    fn subject_performance_serializes_names() {
        let performance = subject_performance(&[student(70, 80.0, 70)], None);
        let json = serde_json::to_value(&performance).unwrap();
        assert_eq!(json[0]["subject"], "Mathematics");
        assert_eq!(json[5]["subject"], "PE");
        assert_eq!(json[5]["average"], 70.0);
    }
}
