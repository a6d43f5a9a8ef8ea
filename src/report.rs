use std::fmt::Write;

use chrono::NaiveDate;

use crate::analytics;
use crate::models::{StudentRecord, SubjectSnapshot};
use crate::risk;

/// Students in the high or critical tier, weakest first.
pub fn students_needing_support(students: &[StudentRecord]) -> Vec<&StudentRecord> {
    let mut flagged: Vec<&StudentRecord> = students
        .iter()
        .filter(|record| record.student.is_at_risk())
        .collect();
    flagged.sort_by(|a, b| {
        a.student
            .performance_score()
            .partial_cmp(&b.student.performance_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    flagged
}

pub fn build_report(
    scope: Option<&str>,
    generated_on: NaiveDate,
    students: &[StudentRecord],
    baseline: Option<&SubjectSnapshot>,
) -> String {
    let overview = analytics::overview(students);
    let distribution = analytics::grade_distribution(students);
    let subjects = analytics::subject_performance(students, baseline.map(|s| &s.averages));
    let flagged = students_needing_support(students);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all students");

    let _ = writeln!(output, "# Student Performance Report");
    let _ = writeln!(output, "Generated for {} on {}", scope_label, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");

    if students.is_empty() {
        let _ = writeln!(output, "No students on record.");
        return output;
    }

    let _ = writeln!(output, "- Students: {}", overview.total_students);
    let _ = writeln!(output, "- Average grade: {}", overview.average_grade);
    let _ = writeln!(output, "- Attendance: {}", overview.attendance_rate);
    let _ = writeln!(output, "- At-risk students: {}", overview.at_risk_students);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Grade Distribution");
    let _ = writeln!(output, "- A: {}%", distribution.a);
    let _ = writeln!(output, "- B: {}%", distribution.b);
    let _ = writeln!(output, "- C: {}%", distribution.c);
    let _ = writeln!(output, "- D/F: {}%", distribution.df);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Performance");
    match baseline {
        Some(snapshot) => {
            let _ = writeln!(output, "Change measured against {}.", snapshot.taken_on);
        }
        None => {
            let _ = writeln!(output, "No earlier snapshot; change not tracked.");
        }
    }
    for row in &subjects {
        let _ = writeln!(
            output,
            "- {}: {:.1} ({:+.1})",
            row.subject.name(),
            row.average,
            row.change
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students Needing Support");

    if flagged.is_empty() {
        let _ = writeln!(output, "No students in the high or critical risk tiers.");
    } else {
        for record in flagged.iter().take(10) {
            let _ = writeln!(
                output,
                "- {} ({}, {}) score {:.1}: {} / {}",
                record.profile.name,
                record.profile.student_id,
                record.profile.grade_level,
                record.student.performance_score(),
                record.student.performance_level(),
                record.student.prediction()
            );
            for advice in risk::recommendations(&record.student) {
                let _ = writeln!(output, "  - {}", advice);
            }
        }
    }

    output
}
